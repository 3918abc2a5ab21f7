//! Slice encoding, caching and serving.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              SliceService               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  SliceCache  │  │  ViewDeduper    │  │
//! │  │  (decrypted  │  │  (session,      │  │
//! │  │   AVIF)      │  │   chapter)      │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬──────────────────┬───────────┘
//!            ▼                  ▼
//!      ┌──────────┐      ┌─────────────┐
//!      │ Catalog  │      │  BlobStore  │
//!      └──────────┘      └─────────────┘
//! ```
//!
//! [`AvifSliceEncoder`] lives here too: ingestion uses it to produce the
//! bytes this service later returns.

mod cache;
mod encoder;
mod service;
mod views;

pub use cache::{SliceCache, DEFAULT_SLICE_CACHE_CAPACITY};
pub use encoder::{
    is_source_image, AvifSliceEncoder, CodecFailure, DEFAULT_AVIF_QUALITY, DEFAULT_AVIF_SPEED,
    MAX_AVIF_QUALITY, MIN_AVIF_QUALITY, SLICE_CONTENT_TYPE, SLICE_EXTENSION, SOURCE_EXTENSIONS,
};
pub use service::{ChapterListing, ChapterView, SliceResponse, SliceService};
pub use views::{ViewDeduper, DEFAULT_VIEW_DEDUP_CAPACITY};
