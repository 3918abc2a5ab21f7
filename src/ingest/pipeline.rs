//! Ingestion pipeline: source images in, stored slices and catalog rows out.
//!
//! ```text
//! ingest_archive / ingest_folder
//!   1. Wait for an ingest permit
//!   2. Decode, cut and encode pages (blocking pool)
//!   3. Write slices and thumbnail under a fresh revision, encrypting slices
//!      if a key is set
//!   4. One transaction: upsert chapters, replace slice rows, queue events
//!   5. After commit: delete replaced blobs, invalidate cache, drain outbox
//! ```
//!
//! A page that fails to decode or encode is skipped with a warning; an
//! archive or upload left with no usable page is rejected. If the
//! transaction fails, the blobs written in step 3 are removed again; blobs
//! left behind by a crash between steps 3 and 4 are orphans and never
//! referenced.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::catalog::{
    normalize_chapter_number, replace_slices, set_thumbnail, upsert_chapter, Catalog,
    DeletedChapter, NewSlice, Work,
};
use crate::config::SiteSettings;
use crate::crypto::SliceCipher;
use crate::error::IngestError;
use crate::events::{self, ChapterEvent, Notifier};
use crate::io::layout::{new_revision, revision_dir, slice_path, thumbnail_path};
use crate::io::BlobStore;
use crate::slice::{is_source_image, AvifSliceEncoder, CodecFailure, SliceCache};

use super::archive::{read_archive, ChapterSource, SourcePage};
use super::slicer::{encode_page, EncodedSlice};

// =============================================================================
// Requests & Reports
// =============================================================================

/// One file from a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Bytes,
}

/// A chapter written by an ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterReport {
    pub chapter_id: i64,
    pub number: String,
    pub slug: String,
    pub slice_count: usize,
    pub created: bool,
}

/// A source image that was left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedImage {
    pub chapter: String,
    pub filename: String,
    pub reason: String,
}

/// Outcome of one ingest request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub chapters: Vec<ChapterReport>,
    pub skipped: Vec<SkippedImage>,
    /// Archive entries that were not chapter images
    pub ignored_entries: usize,
}

/// A chapter whose slices are stored but not yet committed.
struct PreparedChapter {
    number: String,
    slices: Vec<NewSlice>,
    thumbnail_path: Option<String>,
}

impl PreparedChapter {
    fn blob_paths(&self) -> Vec<String> {
        self.slices
            .iter()
            .map(|s| s.blob_path.clone())
            .chain(self.thumbnail_path.clone())
            .collect()
    }
}

/// Cleanup owed once a transaction has committed.
#[derive(Default)]
struct Superseded {
    slice_ids: Vec<i64>,
    blob_paths: Vec<String>,
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct IngestPipeline {
    catalog: Catalog,
    store: Arc<dyn BlobStore>,
    cipher: Option<Arc<SliceCipher>>,
    cache: Arc<SliceCache>,
    notifier: Arc<dyn Notifier>,
    permits: Arc<Semaphore>,
}

impl IngestPipeline {
    /// Create a pipeline that runs at most `max_concurrent` ingests at once.
    pub fn new(
        catalog: Catalog,
        store: Arc<dyn BlobStore>,
        cipher: Option<Arc<SliceCipher>>,
        cache: Arc<SliceCache>,
        notifier: Arc<dyn Notifier>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            catalog,
            store,
            cipher,
            cache,
            notifier,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Ingest a zip archive with one folder per chapter.
    ///
    /// All chapters of the archive are committed together.
    pub async fn ingest_archive(
        &self,
        settings: &SiteSettings,
        work: &Work,
        archive: Bytes,
    ) -> Result<IngestReport, IngestError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))?;

        let contents = tokio::task::spawn_blocking(move || read_archive(&archive))
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))??;

        let mut report = IngestReport {
            ignored_entries: contents.ignored.len(),
            ..IngestReport::default()
        };
        info!(
            work = %work.slug,
            chapters = contents.chapters.len(),
            "Ingesting chapter archive"
        );

        let mut prepared = Vec::new();
        for source in contents.chapters {
            match self.prepare(settings, work, source, None, &mut report.skipped).await {
                Ok(Some(chapter)) => prepared.push(chapter),
                Ok(None) => {}
                Err(e) => {
                    self.discard(&prepared).await;
                    return Err(e);
                }
            }
        }

        if prepared.is_empty() {
            warn!(work = %work.slug, skipped = report.skipped.len(), "Archive has no usable images");
            return Err(IngestError::InvalidArchive {
                reason: format!(
                    "no chapter has a usable image ({} skipped)",
                    report.skipped.len()
                ),
            });
        }

        report.chapters = self.commit(work, prepared, Utc::now()).await?;
        Ok(report)
    }

    /// Ingest one chapter from individually uploaded images.
    pub async fn ingest_folder(
        &self,
        settings: &SiteSettings,
        work: &Work,
        chapter_number: &str,
        files: Vec<UploadedFile>,
        thumbnail: Option<UploadedFile>,
    ) -> Result<IngestReport, IngestError> {
        let number = normalize_chapter_number(chapter_number);
        if number.is_empty() {
            return Err(IngestError::InvalidUpload {
                reason: "chapter number is required".to_string(),
            });
        }

        let mut pages: Vec<SourcePage> = files
            .into_iter()
            .filter(|f| is_source_image(&f.filename))
            .map(|f| SourcePage {
                filename: f.filename,
                data: f.data,
            })
            .collect();
        if pages.is_empty() {
            return Err(IngestError::InvalidUpload {
                reason: "no image files in upload".to_string(),
            });
        }
        pages.sort_by(|a, b| a.filename.cmp(&b.filename));

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))?;

        let mut report = IngestReport::default();
        let source = ChapterSource { number, pages };
        let prepared = self
            .prepare(settings, work, source, thumbnail, &mut report.skipped)
            .await?
            .ok_or_else(|| IngestError::InvalidUpload {
                reason: format!("none of the {} images could be read", report.skipped.len()),
            })?;

        report.chapters = self.commit(work, vec![prepared], Utc::now()).await?;
        Ok(report)
    }

    /// Delete a chapter, its slices and thumbnail.
    ///
    /// Blobs are removed by revision directory, which only this chapter's
    /// uploads ever write into. Other chapters sharing the chapter folder
    /// are left alone.
    pub async fn delete_chapter(
        &self,
        work: &Work,
        chapter_key: &str,
    ) -> Result<DeletedChapter, IngestError> {
        let chapter = self.catalog.find_chapter(work, chapter_key).await?;
        let deleted = self.catalog.delete_chapter(work, &chapter, Utc::now()).await?;
        self.cache.invalidate(&deleted.slice_ids).await;

        let mut revisions: Vec<String> = Vec::new();
        let mut loose: Vec<String> = Vec::new();
        for path in &deleted.blob_paths {
            match revision_dir(path) {
                Some(dir) => revisions.push(dir.to_string()),
                None => loose.push(path.clone()),
            }
        }
        revisions.sort();
        revisions.dedup();

        for prefix in &revisions {
            if let Err(e) = self.store.delete_prefix(prefix).await {
                warn!(prefix = %prefix, error = %e, "Failed to delete revision directory");
            }
        }
        self.delete_blobs(&loose).await;

        self.drain().await;
        Ok(deleted)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Encode one chapter and store its slices.
    ///
    /// Returns `None` when no page could be encoded.
    async fn prepare(
        &self,
        settings: &SiteSettings,
        work: &Work,
        source: ChapterSource,
        thumbnail: Option<UploadedFile>,
        skipped: &mut Vec<SkippedImage>,
    ) -> Result<Option<PreparedChapter>, IngestError> {
        let encoder = settings.encoder;
        let slice_height = settings.slice_height;
        let number = source.number.clone();

        let (encoded, failures, thumbnail) = tokio::task::spawn_blocking(move || {
            let (encoded, failures) = encode_chapter(&encoder, &source, slice_height);
            let thumbnail = thumbnail.and_then(|file| match encoder.transcode(&file.data) {
                Ok(data) => Some(data),
                Err(failure) => {
                    warn!(filename = %file.filename, failure = ?failure, "Skipping unreadable thumbnail");
                    None
                }
            });
            (encoded, failures, thumbnail)
        })
        .await
        .map_err(|e| IngestError::Worker(e.to_string()))?;

        for (filename, failure) in failures {
            let error = codec_error(&filename, failure);
            warn!(work = %work.slug, chapter = %number, error = %error, "Skipping image");
            skipped.push(SkippedImage {
                chapter: number.clone(),
                filename,
                reason: error.to_string(),
            });
        }

        if encoded.is_empty() {
            warn!(work = %work.slug, chapter = %number, "No usable images, chapter left unchanged");
            return Ok(None);
        }

        let revision = new_revision();
        let mut slices: Vec<NewSlice> = Vec::with_capacity(encoded.len());
        for (order, slice) in encoded.into_iter().enumerate() {
            let path = slice_path(&work.slug, &number, &revision, &slice.filename);
            if let Err(e) = self.store_slice(&path, slice.data).await {
                let written: Vec<String> = slices.iter().map(|s| s.blob_path.clone()).collect();
                self.delete_blobs(&written).await;
                return Err(e);
            }

            slices.push(NewSlice {
                sort_order: order as i64,
                original_filename: slice.original_filename,
                blob_path: path,
                encrypted: self.cipher.is_some(),
            });
        }

        // Thumbnails are public and stay in plaintext
        let stored_thumbnail = match thumbnail {
            Some(data) => {
                let path = thumbnail_path(&work.slug, &number, &revision);
                if let Err(e) = self.store.put(&path, data).await {
                    let written: Vec<String> =
                        slices.iter().map(|s| s.blob_path.clone()).collect();
                    self.delete_blobs(&written).await;
                    return Err(e.into());
                }
                Some(path)
            }
            None => None,
        };

        debug!(
            work = %work.slug,
            chapter = %number,
            slices = slices.len(),
            revision = %revision,
            "Stored chapter slices"
        );
        Ok(Some(PreparedChapter {
            number,
            slices,
            thumbnail_path: stored_thumbnail,
        }))
    }

    /// Commit prepared chapters in one transaction, then clean up.
    async fn commit(
        &self,
        work: &Work,
        prepared: Vec<PreparedChapter>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChapterReport>, IngestError> {
        if prepared.is_empty() {
            return Ok(Vec::new());
        }

        let (reports, superseded) = match self.write_rows(work, &prepared, now).await {
            Ok(result) => result,
            Err(e) => {
                warn!(work = %work.slug, error = %e, "Ingest transaction failed, removing new slices");
                self.discard(&prepared).await;
                return Err(e);
            }
        };

        self.cache.invalidate(&superseded.slice_ids).await;
        self.delete_blobs(&superseded.blob_paths).await;
        self.drain().await;

        for report in &reports {
            info!(
                work = %work.slug,
                chapter = %report.number,
                slices = report.slice_count,
                created = report.created,
                "Chapter published"
            );
        }
        Ok(reports)
    }

    async fn write_rows(
        &self,
        work: &Work,
        prepared: &[PreparedChapter],
        now: DateTime<Utc>,
    ) -> Result<(Vec<ChapterReport>, Superseded), IngestError> {
        let mut tx = self.catalog.pool().begin().await?;
        let mut reports = Vec::with_capacity(prepared.len());
        let mut superseded = Superseded::default();

        for chapter in prepared {
            let upsert = upsert_chapter(&mut tx, work, &chapter.number, now).await?;
            let row = upsert.chapter;

            let old = replace_slices(&mut tx, row.id, &chapter.slices).await?;
            superseded.slice_ids.extend(old.iter().map(|s| s.id));
            superseded
                .blob_paths
                .extend(old.into_iter().map(|s| s.blob_path));

            if let Some(path) = &chapter.thumbnail_path {
                set_thumbnail(&mut tx, row.id, path).await?;
                if let Some(previous) = row.thumbnail_path.as_ref().filter(|p| *p != path) {
                    superseded.blob_paths.push(previous.clone());
                }
            }

            let event = ChapterEvent::Published {
                work_slug: work.slug.clone(),
                work_title: work.title.clone(),
                chapter_number: row.number.clone(),
                chapter_slug: row.slug.clone(),
                slice_count: chapter.slices.len(),
                created: upsert.created,
            };
            events::record(&mut tx, &event, now).await?;

            reports.push(ChapterReport {
                chapter_id: row.id,
                number: row.number,
                slug: row.slug,
                slice_count: chapter.slices.len(),
                created: upsert.created,
            });
        }

        tx.commit().await?;
        Ok((reports, superseded))
    }

    async fn store_slice(&self, path: &str, data: Bytes) -> Result<(), IngestError> {
        let data = match &self.cipher {
            Some(cipher) => Bytes::from(cipher.encrypt(path, &data)?),
            None => data,
        };
        self.store.put(path, data).await?;
        Ok(())
    }

    async fn discard(&self, prepared: &[PreparedChapter]) {
        let paths: Vec<String> = prepared.iter().flat_map(PreparedChapter::blob_paths).collect();
        self.delete_blobs(&paths).await;
    }

    async fn delete_blobs(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = self.store.delete(path).await {
                warn!(path = %path, error = %e, "Failed to delete blob");
            }
        }
    }

    async fn drain(&self) {
        if let Err(e) =
            events::drain_outbox(self.catalog.pool(), self.notifier.as_ref(), Utc::now()).await
        {
            warn!(error = %e, "Failed to drain outbox");
        }
    }
}

/// Encode every page of a chapter, collecting failures per page.
fn encode_chapter(
    encoder: &AvifSliceEncoder,
    source: &ChapterSource,
    slice_height: u32,
) -> (Vec<EncodedSlice>, Vec<(String, CodecFailure)>) {
    let mut encoded = Vec::new();
    let mut failures = Vec::new();

    for page in &source.pages {
        let next_order = encoded.len() as i64;
        match encode_page(encoder, &page.filename, &page.data, slice_height, next_order) {
            Ok(slices) => encoded.extend(slices),
            Err(failure) => failures.push((page.filename.clone(), failure)),
        }
    }

    (encoded, failures)
}

fn codec_error(filename: &str, failure: CodecFailure) -> IngestError {
    match failure {
        CodecFailure::Decode(message) => IngestError::ImageDecodeFailure {
            filename: filename.to_string(),
            message,
        },
        CodecFailure::Encode(message) => IngestError::EncodeFailure {
            filename: filename.to_string(),
            message,
        },
    }
}
