//! HTTP handlers for the reader API.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /auth/providers` - Configured identity providers
//! - `GET /works/{slug}` - Work summary
//! - `GET /works/{slug}/chapters` - Chapter list with access decisions
//! - `GET /works/{slug}/chapters/{chapter}` - Reader payload
//! - `GET /works/{slug}/chapters/{chapter}/download` - Chapter zip
//! - `GET /thumbnails/{chapter_id}` - Chapter thumbnail
//! - `GET /slices/{slice_id}` - One decrypted slice (signed URL)

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::catalog::{Chapter, Work};
use crate::config::SiteSettings;
use crate::credentials::{configured_providers, CredentialSource, OAuthProvider};
use crate::error::{
    CatalogError, CredentialError, IngestError, LedgerError, SliceError, StorageError,
};
use crate::ingest::IngestPipeline;
use crate::policy::AccessDecision;
use crate::slice::{ChapterListing, ChapterView, SliceService, SLICE_CONTENT_TYPE};

use super::auth::{CurrentViewer, SignedUrlAuth};

/// Message returned for every server-side failure; details go to the log.
const GENERIC_SERVER_MESSAGE: &str = "Something went wrong on our side, please try again";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub slices: Arc<SliceService>,
    pub ingest: Arc<IngestPipeline>,
    /// Immutable settings snapshot; handlers clone the `Arc` once per request
    pub settings: Arc<SiteSettings>,
    pub credentials: Arc<Vec<CredentialSource>>,
    pub auth: SignedUrlAuth,
    /// Whether slice URLs carry a signature
    pub sign_slice_urls: bool,
}

impl AppState {
    pub fn new(
        slices: SliceService,
        ingest: IngestPipeline,
        settings: SiteSettings,
        credentials: Vec<CredentialSource>,
    ) -> Self {
        Self {
            slices: Arc::new(slices),
            ingest: Arc::new(ingest),
            settings: Arc::new(settings),
            credentials: Arc::new(credentials),
            auth: SignedUrlAuth::new(""),
            sign_slice_urls: false,
        }
    }

    /// Set the signer for viewer tokens and, if `sign_slice_urls`, slice URLs.
    pub fn with_auth(mut self, auth: SignedUrlAuth, sign_slice_urls: bool) -> Self {
        self.auth = auth;
        self.sign_slice_urls = sign_slice_urls;
        self
    }

    pub fn settings(&self) -> Arc<SiteSettings> {
        Arc::clone(&self.settings)
    }

    /// URL under which the reader fetches a slice.
    pub fn slice_url(&self, slice_id: i64, ttl: Duration) -> String {
        let path = format!("/slices/{}", slice_id);
        if self.sign_slice_urls {
            self.auth.signed_path(&path, ttl)
        } else {
            path
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "chapter_locked")
    pub error: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<OAuthProvider>,
}

/// Work summary with its donation meter.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResponse {
    #[serde(flatten)]
    pub work: Work,
    /// Share of the donation goal reached, 0-100; absent without a goal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donation_percent: Option<u8>,
}

impl From<Work> for WorkResponse {
    fn from(work: Work) -> Self {
        let donation_percent = (work.donation_goal > 0).then(|| {
            let percent = work.current_donations.max(0) as i128 * 100 / work.donation_goal as i128;
            percent.min(100) as u8
        });
        Self {
            work,
            donation_percent,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChapterListResponse {
    pub work: String,
    pub chapters: Vec<ChapterListing>,
}

#[derive(Debug, Serialize)]
pub struct WorkRef {
    pub slug: String,
    pub title: String,
}

/// Navigation target in the reader.
#[derive(Debug, Serialize)]
pub struct ChapterRef {
    pub number: String,
    pub slug: String,
    pub title: String,
}

impl From<Chapter> for ChapterRef {
    fn from(chapter: Chapter) -> Self {
        Self {
            number: chapter.number,
            slug: chapter.slug,
            title: chapter.title,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceLink {
    pub id: i64,
    pub sort_order: i64,
    pub url: String,
}

/// Reader payload for one chapter.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderResponse {
    pub work: WorkRef,
    pub chapter: Chapter,
    pub access: AccessDecision,
    pub previous: Option<ChapterRef>,
    pub next: Option<ChapterRef>,
    pub slices: Vec<SliceLink>,
    pub view_counted: bool,
}

impl ReaderResponse {
    fn new(view: ChapterView, slice_url: impl Fn(i64) -> String) -> Self {
        let slices = view
            .slices
            .iter()
            .map(|slice| SliceLink {
                id: slice.id,
                sort_order: slice.sort_order,
                url: slice_url(slice.id),
            })
            .collect();

        Self {
            work: WorkRef {
                slug: view.work.slug,
                title: view.work.title,
            },
            chapter: view.chapter,
            access: view.decision,
            previous: view.previous.map(ChapterRef::from),
            next: view.next.map(ChapterRef::from),
            slices,
            view_counted: view.view_counted,
        }
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Any error a handler can return.
#[derive(Debug)]
pub enum ApiError {
    Slice(SliceError),
    Ingest(IngestError),
    Ledger(LedgerError),
    Catalog(CatalogError),
    Credential(CredentialError),
    BadRequest(String),
}

impl From<SliceError> for ApiError {
    fn from(err: SliceError) -> Self {
        ApiError::Slice(err)
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::Ingest(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::Catalog(err)
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        ApiError::Credential(err)
    }
}

type Classified = (StatusCode, &'static str);

fn classify_storage(err: &StorageError) -> Classified {
    match err {
        StorageError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
    }
}

fn classify_catalog(err: &CatalogError) -> Classified {
    match err {
        CatalogError::WorkNotFound { .. }
        | CatalogError::ChapterNotFound { .. }
        | CatalogError::SliceNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        CatalogError::WorkExists { .. } => (StatusCode::CONFLICT, "work_exists"),
        CatalogError::InvalidWork { .. } => (StatusCode::BAD_REQUEST, "invalid_work"),
        CatalogError::Database(_) | CatalogError::InvalidTimestamp(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
        }
    }
}

fn classify_ledger(err: &LedgerError) -> Classified {
    match err {
        LedgerError::ConcurrentBalanceConflict { .. } => {
            (StatusCode::PAYMENT_REQUIRED, "insufficient_balance")
        }
        LedgerError::AlreadyUnlocked { .. } => (StatusCode::CONFLICT, "already_unlocked"),
        LedgerError::NotPurchasable { .. } => (StatusCode::BAD_REQUEST, "not_purchasable"),
        LedgerError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount"),
        LedgerError::Catalog(e) => classify_catalog(e),
    }
}

impl ApiError {
    fn classify(&self) -> Classified {
        match self {
            ApiError::Slice(err) => match err {
                SliceError::Locked => (StatusCode::FORBIDDEN, "chapter_locked"),
                SliceError::VipRequired => (StatusCode::FORBIDDEN, "vip_required"),
                SliceError::DecryptionFailure { .. } => (StatusCode::NOT_FOUND, "not_found"),
                SliceError::Storage(e) => classify_storage(e),
                SliceError::Catalog(e) => classify_catalog(e),
                SliceError::Ledger(e) => classify_ledger(e),
                SliceError::Archive(_) => (StatusCode::INTERNAL_SERVER_ERROR, "archive_error"),
            },
            ApiError::Ingest(err) => match err {
                IngestError::InvalidArchive { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid_archive")
                }
                IngestError::InvalidUpload { .. } => (StatusCode::BAD_REQUEST, "invalid_upload"),
                IngestError::ImageDecodeFailure { .. } | IngestError::EncodeFailure { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid_image")
                }
                IngestError::Storage(e) => classify_storage(e),
                IngestError::Catalog(e) => classify_catalog(e),
                IngestError::Crypto(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crypto_error"),
                IngestError::Worker(_) => (StatusCode::INTERNAL_SERVER_ERROR, "worker_error"),
            },
            ApiError::Ledger(err) => classify_ledger(err),
            ApiError::Catalog(err) => classify_catalog(err),
            ApiError::Credential(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Slice(e) => e.to_string(),
            ApiError::Ingest(e) => e.to_string(),
            ApiError::Ledger(e) => e.to_string(),
            ApiError::Catalog(e) => e.to_string(),
            ApiError::Credential(e) => e.to_string(),
            ApiError::BadRequest(message) => message.clone(),
        }
    }
}

/// Logs by severity: 5xx at ERROR, 404 at DEBUG, other 4xx at WARN.
///
/// Server errors reach the client only as a generic message.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();
        let detail = self.detail();

        let message = if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                detail
            );
            GENERIC_SERVER_MESSAGE.to_string()
        } else {
            if let ApiError::Slice(SliceError::DecryptionFailure { .. }) = self {
                warn!(error_type = error_type, status = status.as_u16(), "{}", detail);
            } else if status == StatusCode::NOT_FOUND {
                debug!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Resource not found: {}",
                    detail
                );
            } else {
                warn!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Client error: {}",
                    detail
                );
            }
            if status == StatusCode::NOT_FOUND {
                "Not found".to_string()
            } else {
                detail
            }
        };

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Identity providers a client may offer for sign-in.
///
/// # Endpoint
///
/// `GET /auth/providers`
pub async fn providers_handler(
    State(state): State<AppState>,
) -> Result<Json<ProvidersResponse>, ApiError> {
    let providers = configured_providers(&state.credentials).await?;
    Ok(Json(ProvidersResponse { providers }))
}

/// # Endpoint
///
/// `GET /works/{slug}`
///
/// # Response
///
/// - `200 OK`: work, tier configuration and donation meter
/// - `404 Not Found`: unknown work
pub async fn work_handler(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<WorkResponse>, ApiError> {
    let work = state.slices.work(&slug).await?;
    Ok(Json(WorkResponse::from(work)))
}

/// Chapters newest first, each with the access decision for the caller.
///
/// # Endpoint
///
/// `GET /works/{slug}/chapters`
pub async fn chapters_handler(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let (work, chapters) = state.slices.list_chapters(&viewer, &slug, Utc::now()).await?;
    let body = ChapterListResponse {
        work: work.slug,
        chapters,
    };
    Ok(([(header::CACHE_CONTROL, "private, no-store")], Json(body)).into_response())
}

/// Reader payload for one chapter.
///
/// # Endpoint
///
/// `GET /works/{slug}/chapters/{chapter}` where `chapter` is a slug or a
/// chapter number.
///
/// # Response
///
/// - `200 OK`: decision, navigation and signed slice URLs in display order
/// - `403 Forbidden`: same body with an empty slice list, while blocked
/// - `404 Not Found`: unknown work or chapter
pub async fn reader_handler(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
    Path((slug, chapter)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let settings = state.settings();
    let view = state
        .slices
        .open_chapter(&viewer, &slug, &chapter, Utc::now())
        .await?;

    let status = if view.decision.blocked {
        StatusCode::FORBIDDEN
    } else {
        StatusCode::OK
    };
    let body = ReaderResponse::new(view, |id| state.slice_url(id, settings.slice_url_ttl));

    Ok((
        status,
        [(header::CACHE_CONTROL, "private, no-store")],
        Json(body),
    )
        .into_response())
}

/// Zip of a chapter's slices for subscribers and staff.
///
/// # Endpoint
///
/// `GET /works/{slug}/chapters/{chapter}/download`
///
/// # Response
///
/// - `200 OK`: `application/zip` attachment
/// - `403 Forbidden`: viewer is neither a subscriber nor staff
pub async fn download_handler(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
    Path((slug, chapter)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (chapter, archive) = state
        .slices
        .download(&viewer, &slug, &chapter, Utc::now())
        .await?;

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}-{}.zip\"", slug, chapter.slug),
        ),
        (header::CACHE_CONTROL, "private, no-store".to_string()),
    ];
    Ok((headers, archive).into_response())
}

/// # Endpoint
///
/// `GET /thumbnails/{chapter_id}`
pub async fn thumbnail_handler(
    State(state): State<AppState>,
    Path(chapter_id): Path<i64>,
) -> Result<Response, ApiError> {
    let settings = state.settings();
    let data = state.slices.thumbnail(chapter_id).await?;

    let headers = [
        (header::CONTENT_TYPE, SLICE_CONTENT_TYPE.to_string()),
        (
            header::CACHE_CONTROL,
            format!("public, max-age={}", settings.cache_max_age),
        ),
    ];
    Ok((headers, data).into_response())
}

/// One decrypted slice.
///
/// # Endpoint
///
/// `GET /slices/{slice_id}?exp=...&sig=...`
///
/// # Response
///
/// - `200 OK`: `image/avif`
/// - `401 Unauthorized`: missing, expired or invalid signature
/// - `404 Not Found`: unknown slice, missing blob or undecryptable bytes
///
/// # Headers
///
/// - `Cache-Control: private, max-age={cache_max_age}`
/// - `X-Slice-Cache-Hit: true|false`
pub async fn slice_handler(
    State(state): State<AppState>,
    Path(slice_id): Path<i64>,
) -> Result<Response, ApiError> {
    let settings = state.settings();
    let response = state.slices.slice(slice_id).await?;

    let headers = [
        (header::CONTENT_TYPE, SLICE_CONTENT_TYPE.to_string()),
        (
            header::CACHE_CONTROL,
            format!("private, max-age={}", settings.cache_max_age),
        ),
        (
            HeaderName::from_static("x-slice-cache-hit"),
            response.cache_hit.to_string(),
        ),
    ];
    Ok((headers, response.data).into_response())
}
