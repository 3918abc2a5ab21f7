//! Reader API integration tests.
//!
//! Tests verify:
//! - Chapter lists carry per-chapter access decisions, newest first
//! - Blocked chapters return 403 with the decision and no slices
//! - Open chapters return signed slice URLs that serve decrypted AVIF
//! - View counting per session, never for staff
//! - Subscriber-only downloads

use std::io::{Cursor, Read};

use axum::http::StatusCode;
use bytes::Bytes;

use astra_reader::{BlobStore, TierConfig};

use super::test_utils::{
    body_bytes, body_json, get, get_as, get_with_session, is_avif, timed_tier, TestApp,
};

// =============================================================================
// Works and Chapter Lists
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let response = app.send(get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_work_summary() {
    let app = TestApp::new().await;
    app.create_work("solo", timed_tier(), 30).await;

    let response = app.send(get("/works/solo")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["slug"], "solo");
    assert_eq!(body["coinUnlockPrice"], 30);
    assert_eq!(body["tier"]["recentVipChapterCount"], 2);
    assert_eq!(body["donationGoal"], 1000);
    assert_eq!(body["donationPercent"], 0);
}

#[tokio::test]
async fn test_unknown_work_is_404() {
    let app = TestApp::new().await;
    let response = app.send(get("/works/missing")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_chapter_list_with_decisions() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", timed_tier(), 0).await;
    app.publish_chapters(&work, 2).await;

    let response = app.send(get("/works/solo/chapters")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "private, no-store"
    );

    let body = body_json(response).await;
    let chapters = body["chapters"].as_array().unwrap();
    assert_eq!(chapters.len(), 2);

    assert_eq!(chapters[0]["number"], "2");
    assert_eq!(chapters[0]["access"]["blocked"], true);
    assert!(chapters[0]["access"]["unlockAt"].is_string());
    let remaining = chapters[0]["access"]["secondsRemaining"].as_i64().unwrap();
    assert!(remaining > 6 * 86_400 && remaining <= 7 * 86_400);

    assert_eq!(chapters[1]["number"], "1");
    assert_eq!(chapters[1]["access"]["blocked"], false);
    assert!(chapters[1]["access"]["unlockAt"].is_null());
}

#[tokio::test]
async fn test_subscriber_sees_everything_open() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", timed_tier(), 0).await;
    app.publish_chapters(&work, 2).await;

    let token = app.subscriber_token("reader-1");
    let body = body_json(app.send(get_as("/works/solo/chapters", &token)).await).await;

    for chapter in body["chapters"].as_array().unwrap() {
        assert_eq!(chapter["access"]["blocked"], false);
    }
}

// =============================================================================
// Reader Payload
// =============================================================================

#[tokio::test]
async fn test_blocked_chapter_returns_403_with_decision() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", timed_tier(), 0).await;
    app.publish_chapters(&work, 2).await;

    let response = app.send(get("/works/solo/chapters/2")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["access"]["blocked"], true);
    assert!(body["slices"].as_array().unwrap().is_empty());
    assert_eq!(body["viewCounted"], false);
    assert_eq!(body["previous"]["number"], "1");
    assert!(body["next"].is_null());
}

#[tokio::test]
async fn test_open_chapter_serves_signed_slices() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", timed_tier(), 0).await;
    app.publish_chapters(&work, 2).await;

    let response = app.send(get("/works/solo/chapters/1")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["work"]["slug"], "solo");
    assert_eq!(body["chapter"]["number"], "1");
    assert_eq!(body["next"]["number"], "2");
    assert!(body["previous"].is_null());

    // A 24px page with 16px strips becomes two slices
    let slices = body["slices"].as_array().unwrap();
    assert_eq!(slices.len(), 2);
    assert_eq!(slices[0]["sortOrder"], 0);
    assert_eq!(slices[1]["sortOrder"], 1);

    let url = slices[0]["url"].as_str().unwrap();
    assert!(url.starts_with("/slices/"));
    assert!(url.contains("exp=") && url.contains("sig="));

    let first = app.send(get(url)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("content-type").unwrap(), "image/avif");
    assert_eq!(first.headers().get("x-slice-cache-hit").unwrap(), "false");
    let data = body_bytes(first).await;
    assert!(is_avif(&data));

    let second = app.send(get(url)).await;
    assert_eq!(second.headers().get("x-slice-cache-hit").unwrap(), "true");
    assert_eq!(body_bytes(second).await, data);
}

#[tokio::test]
async fn test_chapter_found_by_slug_or_number() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 1).await;

    let by_number = app.send(get("/works/solo/chapters/1")).await;
    assert_eq!(by_number.status(), StatusCode::OK);

    let missing = app.send(get("/works/solo/chapters/99")).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stored_slices_are_encrypted() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 1).await;

    let paths = app.store.paths().await;
    let slice_path = paths.iter().find(|p| p.starts_with("slices/")).unwrap();
    let stored = app.store.get(slice_path).await.unwrap();
    assert!(!is_avif(&stored));
}

#[tokio::test]
async fn test_tampered_slice_is_404() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 1).await;

    let body = body_json(app.send(get("/works/solo/chapters/1")).await).await;
    let slice_id = body["slices"][0]["id"].as_i64().unwrap();
    let url = body["slices"][0]["url"].as_str().unwrap().to_string();

    let slice = app.catalog.slice_by_id(slice_id).await.unwrap();
    app.store
        .put(&slice.blob_path, Bytes::from_static(b"not a ciphertext at all, sorry"))
        .await
        .unwrap();

    let response = app.send(get(&url)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The other slice of the chapter still decrypts
    let other = body["slices"][1]["url"].as_str().unwrap();
    assert_eq!(app.send(get(other)).await.status(), StatusCode::OK);
}

// =============================================================================
// View Counting
// =============================================================================

#[tokio::test]
async fn test_views_counted_once_per_session() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 1).await;

    let first = body_json(app.send(get_with_session("/works/solo/chapters/1", "s-1")).await).await;
    assert_eq!(first["viewCounted"], true);

    let again = body_json(app.send(get_with_session("/works/solo/chapters/1", "s-1")).await).await;
    assert_eq!(again["viewCounted"], false);

    let other = body_json(app.send(get_with_session("/works/solo/chapters/1", "s-2")).await).await;
    assert_eq!(other["viewCounted"], true);

    // Without any session key nothing is counted
    let anonymous = body_json(app.send(get("/works/solo/chapters/1")).await).await;
    assert_eq!(anonymous["viewCounted"], false);

    let work = app.catalog.work_by_slug("solo").await.unwrap();
    assert_eq!(work.views_count, 2);
    let chapter = app.catalog.find_chapter(&work, "1").await.unwrap();
    assert_eq!(chapter.views, 2);
}

#[tokio::test]
async fn test_staff_views_are_not_counted() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", timed_tier(), 0).await;
    app.publish_chapters(&work, 2).await;

    let token = app.staff_token();
    let response = app.send(get_as("/works/solo/chapters/2", &token)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["access"]["blocked"], false);
    assert_eq!(body["viewCounted"], false);
    assert_eq!(body["slices"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_staff_reads_all_vip_work() {
    let app = TestApp::new().await;
    let tier = TierConfig {
        chapters_are_vip: true,
        ..TierConfig::default()
    };
    let work = app.create_work("vault", tier, 0).await;
    app.publish_chapters(&work, 1).await;

    let reader = app.token("reader-1", false, None);
    let response = app.send(get_as("/works/vault/chapters/1", &reader)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["access"]["blocked"], true);
    assert!(body["access"]["unlockAt"].is_null());

    let staff = app.staff_token();
    let response = app.send(get_as("/works/vault/chapters/1", &staff)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["access"]["blocked"], false);
    assert_eq!(body["slices"].as_array().unwrap().len(), 2);

    let list = body_json(app.send(get_as("/works/vault/chapters", &staff)).await).await;
    assert_eq!(list["chapters"][0]["access"]["blocked"], false);
}

// =============================================================================
// Downloads and Thumbnails
// =============================================================================

#[tokio::test]
async fn test_download_requires_subscription() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 1).await;

    let response = app.send(get("/works/solo/chapters/1/download")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "vip_required");

    let token = app.token("reader-1", false, None);
    let response = app.send(get_as("/works/solo/chapters/1/download", &token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_download_zip_holds_decrypted_slices() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 1).await;

    let token = app.subscriber_token("reader-1");
    let response = app.send(get_as("/works/solo/chapters/1/download", &token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/zip"
    );
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("solo-1.zip"));

    let data = body_bytes(response).await;
    let mut archive = zip::ZipArchive::new(Cursor::new(data.to_vec())).unwrap();
    assert_eq!(archive.len(), 2);

    let mut first = archive.by_name("001.avif").unwrap();
    let mut bytes = Vec::new();
    first.read_to_end(&mut bytes).unwrap();
    assert!(is_avif(&bytes));
}

#[tokio::test]
async fn test_missing_thumbnail_is_404() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 1).await;
    let chapter = app.catalog.find_chapter(&work, "1").await.unwrap();

    let response = app.send(get(&format!("/thumbnails/{}", chapter.id))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_providers_from_database() {
    let app = TestApp::new().await;
    sqlx::query("INSERT INTO oauth_apps (provider, client_id, secret) VALUES ('google', 'id', 'secret')")
        .execute(app.catalog.pool())
        .await
        .unwrap();

    let body = body_json(app.send(get("/auth/providers")).await).await;
    assert_eq!(body["providers"], serde_json::json!(["google"]));
}
