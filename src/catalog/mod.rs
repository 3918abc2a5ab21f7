//! Works, chapters and image slices.
//!
//! # Components
//!
//! - [`Catalog`]: SQLite persistence for works, chapters and slices
//! - [`ChapterKey`]: parsed, sortable form of a free-text chapter number
//! - [`TierConfig`]: per-work VIP release schedule
//!
//! Chapters are always listed newest first (see [`sort_newest_first`]);
//! slices always in ascending `sort_order`.

mod models;
mod numbering;
mod store;

pub use models::{
    Chapter, ImageSlice, NewSlice, NewWork, TierConfig, Work, WorkUpdate,
    DEFAULT_VIP_BASE_RELEASE_DAYS, DEFAULT_VIP_DAYS_DECREASE_PER_TIER, DEFAULT_VIP_TIER_SIZE,
};
pub use numbering::{
    newest_first, normalize_chapter_number, slugify, sort_newest_first, ChapterKey,
};
pub use store::{Catalog, ChapterUpsert, DeletedChapter, DEFAULT_MAX_CONNECTIONS};

pub(crate) use models::timestamp;
pub(crate) use store::{replace_slices, set_thumbnail, slices_for_chapter_in, upsert_chapter};
