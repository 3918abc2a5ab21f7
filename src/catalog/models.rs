//! Catalog entities: works, chapters and their image slices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::CatalogError;

/// Default number of chapters sharing one wait time.
pub const DEFAULT_VIP_TIER_SIZE: u32 = 3;

/// Default wait, in days, for the newest tier.
pub const DEFAULT_VIP_BASE_RELEASE_DAYS: u32 = 7;

/// Default reduction of the wait, in days, per older tier.
pub const DEFAULT_VIP_DAYS_DECREASE_PER_TIER: u32 = 2;

// =============================================================================
// Tier Configuration
// =============================================================================

/// Work-level VIP release schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TierConfig {
    /// Every chapter of the work is VIP, regardless of age
    pub chapters_are_vip: bool,

    /// Chapters without an explicit flag are treated as VIP
    pub default_chapters_are_vip: bool,

    /// How many of the newest chapters take part in the time-decay schedule
    pub recent_vip_chapter_count: u32,

    /// Chapters per tier (values below 1 behave as 1)
    pub vip_tier_size: u32,

    /// Wait for the newest tier, in days
    pub vip_base_release_days: u32,

    /// Wait reduction per older tier, in days
    pub vip_days_decrease_per_tier: u32,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            chapters_are_vip: false,
            default_chapters_are_vip: false,
            recent_vip_chapter_count: 0,
            vip_tier_size: DEFAULT_VIP_TIER_SIZE,
            vip_base_release_days: DEFAULT_VIP_BASE_RELEASE_DAYS,
            vip_days_decrease_per_tier: DEFAULT_VIP_DAYS_DECREASE_PER_TIER,
        }
    }
}

// =============================================================================
// Work
// =============================================================================

/// A manga or novel series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub tier: TierConfig,
    /// Coin price of a permanent single-chapter unlock; 0 disables purchase
    pub coin_unlock_price: i64,
    pub views_count: i64,
    pub donation_goal: i64,
    pub current_donations: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a work.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWork {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub tier: TierConfig,
    #[serde(default)]
    pub coin_unlock_price: i64,
    #[serde(default)]
    pub donation_goal: i64,
}

/// Partial update of a work. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkUpdate {
    pub title: Option<String>,
    pub tier: Option<TierConfig>,
    pub coin_unlock_price: Option<i64>,
    pub donation_goal: Option<i64>,
    /// Zero the donation meter, typically once the goal chapter is out
    #[serde(default)]
    pub reset_donations: bool,
}

#[derive(Debug, FromRow)]
pub(crate) struct WorkRow {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub chapters_are_vip: bool,
    pub default_chapters_are_vip: bool,
    pub recent_vip_chapter_count: i64,
    pub vip_tier_size: i64,
    pub vip_base_release_days: i64,
    pub vip_days_decrease_per_tier: i64,
    pub coin_unlock_price: i64,
    pub views_count: i64,
    pub donation_goal: i64,
    pub current_donations: i64,
    pub created_at: i64,
}

impl TryFrom<WorkRow> for Work {
    type Error = CatalogError;

    fn try_from(row: WorkRow) -> Result<Self, Self::Error> {
        Ok(Work {
            id: row.id,
            slug: row.slug,
            title: row.title,
            tier: TierConfig {
                chapters_are_vip: row.chapters_are_vip,
                default_chapters_are_vip: row.default_chapters_are_vip,
                recent_vip_chapter_count: clamp_u32(row.recent_vip_chapter_count),
                vip_tier_size: clamp_u32(row.vip_tier_size),
                vip_base_release_days: clamp_u32(row.vip_base_release_days),
                vip_days_decrease_per_tier: clamp_u32(row.vip_days_decrease_per_tier),
            },
            coin_unlock_price: row.coin_unlock_price,
            views_count: row.views_count,
            donation_goal: row.donation_goal,
            current_donations: row.current_donations,
            created_at: timestamp(row.created_at)?,
        })
    }
}

// =============================================================================
// Chapter
// =============================================================================

/// A single installment of a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: i64,
    pub work_id: i64,
    /// Free-text identifier ("12", "10.5", "Prólogo")
    pub number: String,
    pub slug: String,
    pub title: String,
    pub is_vip: bool,
    /// Scheduled release time, if set explicitly
    pub release_at: Option<DateTime<Utc>>,
    /// When the chapter first went live
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub thumbnail_path: Option<String>,
    pub views: i64,
}

impl Chapter {
    /// Release time used by the VIP schedule.
    pub fn effective_release(&self) -> Option<DateTime<Utc>> {
        self.release_at.or(self.published_at)
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ChapterRow {
    pub id: i64,
    pub work_id: i64,
    pub number: String,
    pub slug: String,
    pub title: String,
    pub is_vip: bool,
    pub release_at: Option<i64>,
    pub published_at: Option<i64>,
    pub thumbnail_path: Option<String>,
    pub views: i64,
}

impl TryFrom<ChapterRow> for Chapter {
    type Error = CatalogError;

    fn try_from(row: ChapterRow) -> Result<Self, Self::Error> {
        Ok(Chapter {
            id: row.id,
            work_id: row.work_id,
            number: row.number,
            slug: row.slug,
            title: row.title,
            is_vip: row.is_vip,
            release_at: row.release_at.map(timestamp).transpose()?,
            published_at: row.published_at.map(timestamp).transpose()?,
            thumbnail_path: row.thumbnail_path,
            views: row.views,
        })
    }
}

// =============================================================================
// Image Slice
// =============================================================================

/// One stored image of a chapter, in display order.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ImageSlice {
    pub id: i64,
    pub chapter_id: i64,
    pub sort_order: i64,
    pub original_filename: String,
    pub blob_path: String,
    pub encrypted: bool,
}

/// A slice ready to be inserted, produced by ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSlice {
    pub sort_order: i64,
    pub original_filename: String,
    pub blob_path: String,
    pub encrypted: bool,
}

// =============================================================================
// Helpers
// =============================================================================

pub(crate) fn timestamp(secs: i64) -> Result<DateTime<Utc>, CatalogError> {
    DateTime::from_timestamp(secs, 0).ok_or(CatalogError::InvalidTimestamp(secs))
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}
