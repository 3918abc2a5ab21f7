//! Staff and wallet endpoints.
//!
//! Staff routes require a viewer token with the staff flag; wallet routes
//! require any signed-in account.

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{NewWork, Work, WorkUpdate};
use crate::ingest::{IngestReport, UploadedFile};
use crate::wallet::{DonationReceipt, UnlockReceipt};

use super::auth::{AccountViewer, StaffViewer};
use super::handlers::{ApiError, AppState};

/// Body of coin credit and donation requests.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AmountRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChapterResponse {
    pub chapter_id: i64,
    pub number: String,
    pub removed_slices: usize,
}

// =============================================================================
// Works
// =============================================================================

/// # Endpoint
///
/// `POST /admin/works` with a JSON [`NewWork`] body.
///
/// # Response
///
/// - `201 Created`: the new work
/// - `400 Bad Request`: blank slug or title, negative price or goal
/// - `409 Conflict`: slug already taken
pub async fn create_work_handler(
    State(state): State<AppState>,
    StaffViewer(staff): StaffViewer,
    Json(new_work): Json<NewWork>,
) -> Result<(StatusCode, Json<Work>), ApiError> {
    let work = state
        .slices
        .catalog()
        .create_work(&new_work, Utc::now())
        .await?;
    info!(work = %work.slug, staff = ?staff.user_id, "Created work");
    Ok((StatusCode::CREATED, Json(work)))
}

/// `PUT /admin/works/{slug}` with a JSON [`WorkUpdate`] body.
pub async fn update_work_handler(
    State(state): State<AppState>,
    StaffViewer(_): StaffViewer,
    Path(slug): Path<String>,
    Json(update): Json<WorkUpdate>,
) -> Result<Json<Work>, ApiError> {
    let work = state.slices.catalog().update_work(&slug, &update).await?;
    Ok(Json(work))
}

// =============================================================================
// Chapters
// =============================================================================

/// Ingest a zip archive holding one folder per chapter.
///
/// # Endpoint
///
/// `POST /admin/works/{slug}/archive` with the raw zip as the body.
///
/// # Response
///
/// - `200 OK`: [`IngestReport`] with created or replaced chapters and skipped images
/// - `413 Payload Too Large`: body over the upload limit
/// - `422 Unprocessable Entity`: not a zip, or no usable images
pub async fn upload_archive_handler(
    State(state): State<AppState>,
    StaffViewer(_): StaffViewer,
    Path(slug): Path<String>,
    body: Bytes,
) -> Result<Json<IngestReport>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("archive body is empty".to_string()));
    }

    let settings = state.settings();
    let work = state.slices.catalog().work_by_slug(&slug).await?;
    let report = state.ingest.ingest_archive(&settings, &work, body).await?;
    Ok(Json(report))
}

/// Ingest one chapter from individually uploaded images.
///
/// # Endpoint
///
/// `POST /admin/works/{slug}/chapters` as `multipart/form-data` with:
///
/// - `chapter_number`: text field
/// - `files`: one part per page image, ordered by filename
/// - `thumbnail`: optional cover image
///
/// # Response
///
/// - `200 OK`: [`IngestReport`] for the chapter
/// - `400 Bad Request`: no chapter number, or no readable page image
pub async fn upload_chapter_handler(
    State(state): State<AppState>,
    StaffViewer(_): StaffViewer,
    Path(slug): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, ApiError> {
    let mut chapter_number = None;
    let mut files = Vec::new();
    let mut thumbnail = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "chapter_number" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                chapter_number = Some(text);
            }
            "files" | "thumbnail" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                let upload = UploadedFile { filename, data };
                if name == "thumbnail" {
                    thumbnail = Some(upload);
                } else {
                    files.push(upload);
                }
            }
            _ => {}
        }
    }

    let chapter_number = chapter_number
        .ok_or_else(|| ApiError::BadRequest("chapter_number field is required".to_string()))?;

    let settings = state.settings();
    let work = state.slices.catalog().work_by_slug(&slug).await?;
    let report = state
        .ingest
        .ingest_folder(&settings, &work, &chapter_number, files, thumbnail)
        .await?;
    Ok(Json(report))
}

/// `DELETE /admin/works/{slug}/chapters/{chapter}`
pub async fn delete_chapter_handler(
    State(state): State<AppState>,
    StaffViewer(_): StaffViewer,
    Path((slug, chapter)): Path<(String, String)>,
) -> Result<Json<DeleteChapterResponse>, ApiError> {
    let work = state.slices.catalog().work_by_slug(&slug).await?;
    let deleted = state.ingest.delete_chapter(&work, &chapter).await?;

    Ok(Json(DeleteChapterResponse {
        chapter_id: deleted.chapter.id,
        number: deleted.chapter.number,
        removed_slices: deleted.slice_ids.len(),
    }))
}

// =============================================================================
// Wallet
// =============================================================================

/// `POST /admin/wallets/{user_id}/credit` with `{"amount": n}`.
pub async fn credit_wallet_handler(
    State(state): State<AppState>,
    StaffViewer(_): StaffViewer,
    Path(user_id): Path<String>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state
        .slices
        .ledger()
        .credit(&user_id, request.amount, Utc::now())
        .await?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// `GET /wallet`
pub async fn wallet_handler(
    State(state): State<AppState>,
    account: AccountViewer,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.slices.ledger().balance(&account.user_id).await?;
    Ok(Json(BalanceResponse {
        user_id: account.user_id,
        balance,
    }))
}

/// Buy a permanent unlock of one chapter.
///
/// # Endpoint
///
/// `POST /wallet/unlock/{chapter_id}`
///
/// # Response
///
/// - `200 OK`: [`UnlockReceipt`]
/// - `400 Bad Request`: the work does not sell chapters
/// - `402 Payment Required`: balance too low
/// - `409 Conflict`: already unlocked
pub async fn unlock_handler(
    State(state): State<AppState>,
    account: AccountViewer,
    Path(chapter_id): Path<i64>,
) -> Result<Json<UnlockReceipt>, ApiError> {
    let receipt = state
        .slices
        .ledger()
        .unlock_chapter(&account.user_id, chapter_id, Utc::now())
        .await?;
    Ok(Json(receipt))
}

/// `POST /wallet/donate/{slug}` with `{"amount": n}`.
pub async fn donate_handler(
    State(state): State<AppState>,
    account: AccountViewer,
    Path(slug): Path<String>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<DonationReceipt>, ApiError> {
    let receipt = state
        .slices
        .ledger()
        .donate(&account.user_id, &slug, request.amount, Utc::now())
        .await?;
    Ok(Json(receipt))
}
