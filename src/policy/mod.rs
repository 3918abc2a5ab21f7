//! Chapter access control.
//!
//! [`evaluate`] decides whether a chapter is locked behind the VIP paywall
//! from the work's [`TierConfig`](crate::catalog::TierConfig), the chapter's
//! position in the newest-first list and the current time. The viewer
//! override (staff, subscribers, coin unlocks) is applied by the caller with
//! [`AccessDecision::with_override`].

mod engine;
mod viewer;

pub use engine::{
    evaluate, try_evaluate, wait_days, AccessDecision, ChapterSchedule, ChapterStanding,
};
pub use viewer::Viewer;
