//! Chapter ingestion.
//!
//! - [`read_archive`]: zip archive to per-chapter source pages
//! - [`slice_ranges`] / [`encode_page`]: tall pages to AVIF strips
//! - [`IngestPipeline`]: storage, encryption and the catalog transaction

mod archive;
mod pipeline;
mod slicer;

pub use archive::{read_archive, ArchiveContents, ChapterSource, SourcePage, MAX_ENTRY_BYTES};
pub use pipeline::{ChapterReport, IngestPipeline, IngestReport, SkippedImage, UploadedFile};
pub use slicer::{encode_page, slice_ranges, EncodedSlice, DEFAULT_SLICE_HEIGHT};
