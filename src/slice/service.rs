//! Reader-facing service: chapter lists, the reader payload and slice bytes.
//!
//! ```text
//! open_chapter(viewer, work, chapter)
//!   1. Load the work's chapters and build the newest-first schedule
//!   2. Evaluate the access policy, then apply viewer overrides
//!   3. If viewable: list slices and count the view once per session
//!
//! slice(id)
//!   1. Check the decrypted-slice cache
//!   2. Read the blob, decrypt it if needed
//!   3. Cache & return
//! ```

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::catalog::{Catalog, Chapter, ImageSlice, Work};
use crate::crypto::SliceCipher;
use crate::error::{SliceError, StorageError};
use crate::io::BlobStore;
use crate::policy::{AccessDecision, ChapterSchedule, Viewer};
use crate::wallet::Ledger;

use super::cache::SliceCache;
use super::encoder::SLICE_EXTENSION;
use super::views::ViewDeduper;

// =============================================================================
// Responses
// =============================================================================

/// A chapter as shown in a work's chapter list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterListing {
    #[serde(flatten)]
    pub chapter: Chapter,
    pub access: AccessDecision,
}

/// Everything the reader page needs for one chapter.
#[derive(Debug, Clone)]
pub struct ChapterView {
    pub work: Work,
    pub chapter: Chapter,
    pub decision: AccessDecision,
    /// Older neighbour
    pub previous: Option<Chapter>,
    /// Newer neighbour
    pub next: Option<Chapter>,
    /// Slices in display order; empty while the chapter is blocked
    pub slices: Vec<ImageSlice>,
    pub view_counted: bool,
}

/// Decrypted slice bytes.
#[derive(Debug, Clone)]
pub struct SliceResponse {
    pub data: Bytes,
    pub cache_hit: bool,
}

// =============================================================================
// Slice Service
// =============================================================================

pub struct SliceService {
    catalog: Catalog,
    store: Arc<dyn BlobStore>,
    cipher: Option<Arc<SliceCipher>>,
    cache: Arc<SliceCache>,
    views: ViewDeduper,
    ledger: Ledger,
}

impl SliceService {
    /// Create a service. `cache` is shared with ingestion for invalidation.
    pub fn new(
        catalog: Catalog,
        store: Arc<dyn BlobStore>,
        cipher: Option<Arc<SliceCipher>>,
        cache: Arc<SliceCache>,
        views: ViewDeduper,
    ) -> Self {
        let ledger = Ledger::new(catalog.clone());
        Self {
            catalog,
            store,
            cipher,
            cache,
            views,
            ledger,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn cache(&self) -> &SliceCache {
        &self.cache
    }

    pub async fn work(&self, slug: &str) -> Result<Work, SliceError> {
        Ok(self.catalog.work_by_slug(slug).await?)
    }

    /// A work's chapters, newest first, each with its decision for `viewer`.
    pub async fn list_chapters(
        &self,
        viewer: &Viewer,
        work_slug: &str,
        now: DateTime<Utc>,
    ) -> Result<(Work, Vec<ChapterListing>), SliceError> {
        let work = self.catalog.work_by_slug(work_slug).await?;
        let chapters = self.catalog.chapters_for_work(work.id).await?;
        let schedule = ChapterSchedule::new(&work, &chapters);

        let bypass = viewer.bypasses_paywall(now);
        let unlocked = match viewer.user_id.as_deref() {
            Some(user) if !bypass => self.ledger.unlocked_in_work(user, work.id).await?,
            _ => HashSet::new(),
        };

        let listings = schedule
            .chapters()
            .iter()
            .map(|chapter| ChapterListing {
                access: schedule
                    .evaluate(chapter, now)
                    .with_override(bypass || unlocked.contains(&chapter.id)),
                chapter: chapter.clone(),
            })
            .collect();

        Ok((work, listings))
    }

    /// Open a chapter for reading.
    ///
    /// A blocked chapter is not an error here; the caller decides how to
    /// present the decision.
    pub async fn open_chapter(
        &self,
        viewer: &Viewer,
        work_slug: &str,
        chapter_key: &str,
        now: DateTime<Utc>,
    ) -> Result<ChapterView, SliceError> {
        let work = self.catalog.work_by_slug(work_slug).await?;
        let chapter = self.catalog.find_chapter(&work, chapter_key).await?;
        let chapters = self.catalog.chapters_for_work(work.id).await?;
        let schedule = ChapterSchedule::new(&work, &chapters);

        let mut decision = schedule
            .evaluate(&chapter, now)
            .with_override(viewer.bypasses_paywall(now));
        if decision.blocked {
            if let Some(user) = viewer.user_id.as_deref() {
                let unlocked = self.ledger.has_unlocked(user, chapter.id).await?;
                decision = decision.with_override(unlocked);
            }
        }

        let (previous, next) = schedule.neighbours(chapter.id);
        let (previous, next) = (previous.cloned(), next.cloned());

        if decision.blocked {
            debug!(work = %work.slug, chapter = %chapter.number, "Chapter blocked for viewer");
            return Ok(ChapterView {
                work,
                chapter,
                decision,
                previous,
                next,
                slices: Vec::new(),
                view_counted: false,
            });
        }

        let slices = self.catalog.slices_for_chapter(chapter.id).await?;
        let view_counted = self.count_view(viewer, &chapter).await;

        Ok(ChapterView {
            work,
            chapter,
            decision,
            previous,
            next,
            slices,
            view_counted,
        })
    }

    async fn count_view(&self, viewer: &Viewer, chapter: &Chapter) -> bool {
        if viewer.is_staff {
            return false;
        }
        let Some(key) = viewer.view_key() else {
            return false;
        };
        if !self.views.first_view(key, chapter.id).await {
            return false;
        }

        match self.catalog.record_view(chapter).await {
            Ok(()) => true,
            Err(e) => {
                warn!(chapter_id = chapter.id, error = %e, "Failed to record view");
                false
            }
        }
    }

    /// Decrypted bytes of one slice, using the cache when possible.
    pub async fn slice(&self, slice_id: i64) -> Result<SliceResponse, SliceError> {
        if let Some(data) = self.cache.get(slice_id).await {
            return Ok(SliceResponse {
                data,
                cache_hit: true,
            });
        }

        let slice = self.catalog.slice_by_id(slice_id).await?;
        let stored = self.store.get(&slice.blob_path).await?;
        let data = if slice.encrypted {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or_else(|| SliceError::DecryptionFailure {
                    id: slice_id,
                    reason: "no encryption key configured".to_string(),
                })?;
            let plain = cipher
                .decrypt(&slice.blob_path, &stored)
                .map_err(|e| SliceError::DecryptionFailure {
                    id: slice_id,
                    reason: e.to_string(),
                })?;
            Bytes::from(plain)
        } else {
            stored
        };

        self.cache.put(slice_id, data.clone()).await;

        Ok(SliceResponse {
            data,
            cache_hit: false,
        })
    }

    /// Thumbnail bytes of a chapter.
    pub async fn thumbnail(&self, chapter_id: i64) -> Result<Bytes, SliceError> {
        let chapter = self.catalog.chapter_by_id(chapter_id).await?;
        let path = chapter.thumbnail_path.ok_or_else(|| {
            SliceError::Storage(StorageError::NotFound(format!(
                "thumbnail of chapter {}",
                chapter_id
            )))
        })?;
        Ok(self.store.get(&path).await?)
    }

    /// Zip of a chapter's decrypted slices, for subscribers and staff.
    ///
    /// Slices that cannot be recovered are left out.
    pub async fn download(
        &self,
        viewer: &Viewer,
        work_slug: &str,
        chapter_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(Chapter, Bytes), SliceError> {
        if !viewer.bypasses_paywall(now) {
            return Err(SliceError::VipRequired);
        }

        let work = self.catalog.work_by_slug(work_slug).await?;
        let chapter = self.catalog.find_chapter(&work, chapter_key).await?;
        let slices = self.catalog.slices_for_chapter(chapter.id).await?;

        let mut files = Vec::with_capacity(slices.len());
        for (position, slice) in slices.iter().enumerate() {
            match self.slice(slice.id).await {
                Ok(response) => files.push((
                    format!("{:03}.{}", position + 1, SLICE_EXTENSION),
                    response.data,
                )),
                Err(e) => {
                    warn!(slice_id = slice.id, error = %e, "Leaving slice out of download");
                }
            }
        }

        let archive = tokio::task::spawn_blocking(move || write_zip(&files))
            .await
            .map_err(|e| SliceError::Archive(e.to_string()))??;

        debug!(work = %work.slug, chapter = %chapter.number, bytes = archive.len(), "Built chapter download");
        Ok((chapter, archive))
    }
}

fn write_zip(files: &[(String, Bytes)]) -> Result<Bytes, SliceError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for (name, data) in files {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| SliceError::Archive(e.to_string()))?;
        writer
            .write_all(data)
            .map_err(|e| SliceError::Archive(e.to_string()))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| SliceError::Archive(e.to_string()))?;
    Ok(Bytes::from(cursor.into_inner()))
}
