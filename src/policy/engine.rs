//! Tiered, time-decaying VIP schedule.
//!
//! The newest `recent_vip_chapter_count` chapters of a work are grouped into
//! tiers of `vip_tier_size`. Tier 0 waits `vip_base_release_days` after
//! release, each older tier waits `vip_days_decrease_per_tier` days less,
//! floored at zero:
//!
//! ```text
//! index:  0 1 2 | 3 4 5 | 6 7 8 | 9 10 11 | 12 ...
//! wait:     7d  |   5d  |   3d  |   1d    |  0d
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::catalog::{sort_newest_first, Chapter, TierConfig, Work};
use crate::error::AccessPolicyError;

const SECONDS_PER_DAY: i64 = 86_400;

// =============================================================================
// Access Decision
// =============================================================================

/// Outcome of evaluating a chapter for one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "DecisionBody")]
pub struct AccessDecision {
    pub blocked: bool,
    /// When the chapter opens to everyone, if it is waiting on the schedule
    pub unlock_at: Option<DateTime<Utc>>,
    pub time_remaining: Option<Duration>,
}

impl AccessDecision {
    pub fn open() -> Self {
        Self {
            blocked: false,
            unlock_at: None,
            time_remaining: None,
        }
    }

    pub fn locked() -> Self {
        Self {
            blocked: true,
            unlock_at: None,
            time_remaining: None,
        }
    }

    fn waiting(unlock_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            blocked: true,
            unlock_at: Some(unlock_at),
            time_remaining: Some(unlock_at - now),
        }
    }

    /// Lift the block for a viewer who bypasses the paywall.
    ///
    /// The unlock time is kept so clients can still show the public date.
    pub fn with_override(self, bypass: bool) -> Self {
        if bypass {
            Self {
                blocked: false,
                ..self
            }
        } else {
            self
        }
    }
}

/// Wire form: `{"blocked", "unlockAt", "secondsRemaining"}`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecisionBody {
    blocked: bool,
    unlock_at: Option<DateTime<Utc>>,
    seconds_remaining: Option<i64>,
}

impl From<AccessDecision> for DecisionBody {
    fn from(decision: AccessDecision) -> Self {
        Self {
            blocked: decision.blocked,
            unlock_at: decision.unlock_at,
            seconds_remaining: decision.time_remaining.map(|d| d.num_seconds()),
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// What the engine needs to know about one chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterStanding {
    pub is_vip: bool,
    /// Position in the newest-first list, `None` if the chapter is missing
    pub sequence_index: Option<usize>,
    pub released_at: Option<DateTime<Utc>>,
}

/// Evaluate a chapter. Never fails: schedule errors resolve to the
/// chapter's static VIP state.
pub fn evaluate(tier: &TierConfig, standing: &ChapterStanding, now: DateTime<Utc>) -> AccessDecision {
    match try_evaluate(tier, standing, now) {
        Ok(decision) => decision,
        Err(e) => {
            let blocked = standing.is_vip || tier.default_chapters_are_vip;
            debug!(error = %e, blocked, "VIP schedule unavailable, using static flags");
            AccessDecision {
                blocked,
                unlock_at: None,
                time_remaining: None,
            }
        }
    }
}

/// Evaluate a chapter, reporting why the schedule could not be applied.
pub fn try_evaluate(
    tier: &TierConfig,
    standing: &ChapterStanding,
    now: DateTime<Utc>,
) -> Result<AccessDecision, AccessPolicyError> {
    if tier.chapters_are_vip {
        return Ok(AccessDecision::locked());
    }
    if !tier.default_chapters_are_vip && !standing.is_vip {
        return Ok(AccessDecision::open());
    }

    let static_decision = if standing.is_vip {
        AccessDecision::locked()
    } else {
        AccessDecision::open()
    };

    let vip_limit = tier.recent_vip_chapter_count as usize;
    if vip_limit == 0 {
        return Ok(static_decision);
    }

    let index = standing
        .sequence_index
        .ok_or(AccessPolicyError::ChapterNotInWork)?;
    if index >= vip_limit {
        return Ok(static_decision);
    }

    let days = wait_days(tier, index);
    if days == 0 {
        return Ok(AccessDecision::open());
    }

    let released = standing
        .released_at
        .ok_or(AccessPolicyError::MissingReleaseDate)?;
    let wait = Duration::try_seconds(days as i64 * SECONDS_PER_DAY)
        .ok_or(AccessPolicyError::ScheduleOverflow)?;
    let unlock_at = released
        .checked_add_signed(wait)
        .ok_or(AccessPolicyError::ScheduleOverflow)?;

    if now < unlock_at {
        Ok(AccessDecision::waiting(unlock_at, now))
    } else {
        Ok(AccessDecision::open())
    }
}

/// Days a chapter at `index` waits after release.
pub fn wait_days(tier: &TierConfig, index: usize) -> u32 {
    let tier_size = tier.vip_tier_size.max(1) as usize;
    let tier_index = (index / tier_size) as u64;
    let decrease = tier_index.saturating_mul(tier.vip_days_decrease_per_tier as u64);
    (tier.vip_base_release_days as u64).saturating_sub(decrease) as u32
}

// =============================================================================
// Work Schedule
// =============================================================================

/// A work's chapters in newest-first order, ready for evaluation and
/// navigation.
#[derive(Debug, Clone)]
pub struct ChapterSchedule {
    tier: TierConfig,
    chapters: Vec<Chapter>,
}

impl ChapterSchedule {
    pub fn new(work: &Work, chapters: &[Chapter]) -> Self {
        let mut chapters: Vec<Chapter> = chapters
            .iter()
            .filter(|c| c.work_id == work.id)
            .cloned()
            .collect();
        sort_newest_first(&mut chapters);
        Self {
            tier: work.tier,
            chapters,
        }
    }

    /// Chapters, newest first.
    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn position(&self, chapter_id: i64) -> Option<usize> {
        self.chapters.iter().position(|c| c.id == chapter_id)
    }

    pub fn standing(&self, chapter: &Chapter) -> ChapterStanding {
        ChapterStanding {
            is_vip: chapter.is_vip,
            sequence_index: self.position(chapter.id),
            released_at: chapter.effective_release(),
        }
    }

    pub fn evaluate(&self, chapter: &Chapter, now: DateTime<Utc>) -> AccessDecision {
        evaluate(&self.tier, &self.standing(chapter), now)
    }

    /// `(previous, next)` in reading order: the older and newer neighbours.
    pub fn neighbours(&self, chapter_id: i64) -> (Option<&Chapter>, Option<&Chapter>) {
        match self.position(chapter_id) {
            Some(idx) => {
                let previous = self.chapters.get(idx + 1);
                let next = idx.checked_sub(1).and_then(|i| self.chapters.get(i));
                (previous, next)
            }
            None => (None, None),
        }
    }
}
