//! Staff ingestion integration tests.
//!
//! Tests verify:
//! - Work creation and updates require a staff viewer
//! - Archive uploads create chapters; bad archives are rejected
//! - Folder uploads with a thumbnail
//! - Re-uploads replace slices and invalidate old slice URLs
//! - Chapter deletion removes rows and blobs

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use serde_json::json;

use astra_reader::server::VIEWER_HEADER;
use astra_reader::TierConfig;

use super::test_utils::{
    body_bytes, body_json, get, get_as, is_avif, png, send_json, zip_of, TestApp,
};

const BOUNDARY: &str = "astra-test-boundary";

fn upload_archive(slug: &str, token: &str, archive: Bytes) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/admin/works/{}/archive", slug))
        .header(VIEWER_HEADER, token)
        .header("content-type", "application/zip")
        .body(Body::from(archive))
        .unwrap()
}

/// `multipart/form-data` body with text fields and `(field, filename, data)` files.
fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &str, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    for (name, filename, data) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                BOUNDARY, name, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_folder(slug: &str, token: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/admin/works/{}/chapters", slug))
        .header(VIEWER_HEADER, token)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

// =============================================================================
// Works
// =============================================================================

#[tokio::test]
async fn test_create_work_requires_staff() {
    let app = TestApp::new().await;
    let new_work = json!({"slug": "Solo Leveling", "title": "Solo Leveling"});

    let anonymous = Request::builder()
        .method("POST")
        .uri("/admin/works")
        .header("content-type", "application/json")
        .body(Body::from(new_work.to_string()))
        .unwrap();
    assert_eq!(app.send(anonymous).await.status(), StatusCode::UNAUTHORIZED);

    let reader = app.token("reader-1", false, None);
    let response = app
        .send(send_json("POST", "/admin/works", &reader, new_work.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "staff_required");

    let staff = app.staff_token();
    let response = app
        .send(send_json("POST", "/admin/works", &staff, new_work.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["slug"], "solo-leveling");
    assert_eq!(body["tier"]["vipTierSize"], 3);

    let duplicate = app
        .send(send_json("POST", "/admin/works", &staff, new_work))
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_update_work_tier() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let staff = app.staff_token();
    let update = json!({
        "tier": {"defaultChaptersAreVip": true, "recentVipChapterCount": 5},
        "coinUnlockPrice": 40
    });
    let response = app
        .send(send_json("PUT", "/admin/works/solo", &staff, update))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["tier"]["recentVipChapterCount"], 5);
    assert_eq!(body["tier"]["vipBaseReleaseDays"], 7);
    assert_eq!(body["coinUnlockPrice"], 40);
    assert_eq!(body["title"], "SOLO");
}

// =============================================================================
// Archive Uploads
// =============================================================================

#[tokio::test]
async fn test_archive_upload_creates_chapters() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let archive = zip_of(&[
        ("Solo/01/001.png", png(8, 8)),
        ("Solo/01/002.png", png(8, 40)),
        ("Solo/2/001.png", png(8, 8)),
        ("Solo/2/notes.txt", b"hello".to_vec()),
        ("__MACOSX/._001.png", vec![0, 1, 2]),
    ]);
    let staff = app.staff_token();
    let response = app.send(upload_archive("solo", &staff, archive)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let report = body_json(response).await;
    let chapters = report["chapters"].as_array().unwrap();
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0]["number"], "1");
    // 8px page stays whole, 40px page becomes three 16px strips
    assert_eq!(chapters[0]["sliceCount"], 4);
    assert_eq!(chapters[0]["created"], true);
    assert_eq!(chapters[1]["sliceCount"], 1);

    let list = body_json(app.send(get("/works/solo/chapters")).await).await;
    let numbers: Vec<&str> = list["chapters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["number"].as_str().unwrap())
        .collect();
    assert_eq!(numbers, vec!["2", "1"]);
}

#[tokio::test]
async fn test_archive_upload_rejects_non_zip() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let staff = app.staff_token();
    let response = app
        .send(upload_archive(
            "solo",
            &staff,
            Bytes::from_static(b"definitely not a zip"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"], "invalid_archive");

    assert!(app.store.is_empty().await);
}

#[tokio::test]
async fn test_archive_upload_to_unknown_work() {
    let app = TestApp::new().await;
    let staff = app.staff_token();
    let archive = zip_of(&[("1/001.png", png(8, 8))]);

    let response = app.send(upload_archive("missing", &staff, archive)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unreadable_image_is_skipped() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let archive = zip_of(&[
        ("1/001.png", png(8, 8)),
        ("1/002.png", b"\x89PNG but truncated".to_vec()),
    ]);
    let staff = app.staff_token();
    let report = body_json(app.send(upload_archive("solo", &staff, archive)).await).await;

    assert_eq!(report["chapters"][0]["sliceCount"], 1);
    assert_eq!(report["skipped"][0]["filename"], "002.png");
}

#[tokio::test]
async fn test_archive_with_only_unreadable_images_is_rejected() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let archive = zip_of(&[("1/001.png", b"\x89PNG but truncated".to_vec())]);
    let staff = app.staff_token();
    let response = app.send(upload_archive("solo", &staff, archive)).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"], "invalid_archive");
    assert!(app.store.paths().await.is_empty());
}

#[tokio::test]
async fn test_reupload_replaces_slices() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;
    let staff = app.staff_token();

    let first = zip_of(&[("1/001.png", png(8, 40))]);
    app.send(upload_archive("solo", &staff, first)).await;
    let before = body_json(app.send(get("/works/solo/chapters/1")).await).await;
    let old_url = before["slices"][0]["url"].as_str().unwrap().to_string();
    assert_eq!(app.send(get(&old_url)).await.status(), StatusCode::OK);

    let second = zip_of(&[("1/001.png", png(8, 8))]);
    let report = body_json(app.send(upload_archive("solo", &staff, second)).await).await;
    assert_eq!(report["chapters"][0]["created"], false);

    let after = body_json(app.send(get("/works/solo/chapters/1")).await).await;
    assert_eq!(after["chapter"]["id"], before["chapter"]["id"]);
    assert_eq!(after["slices"].as_array().unwrap().len(), 1);

    // Old slice rows and blobs are gone, cached bytes included
    assert_eq!(app.send(get(&old_url)).await.status(), StatusCode::NOT_FOUND);
    let slice_blobs = app
        .store
        .paths()
        .await
        .into_iter()
        .filter(|p| p.starts_with("slices/"))
        .count();
    assert_eq!(slice_blobs, 1);
}

// =============================================================================
// Folder Uploads
// =============================================================================

#[tokio::test]
async fn test_folder_upload_with_thumbnail() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let body = multipart_body(
        &[("chapter_number", "10.50")],
        &[
            ("files", "b.png", png(8, 8)),
            ("files", "a.png", png(8, 20)),
            ("files", "readme.txt", b"skip me".to_vec()),
            ("thumbnail", "cover.png", png(4, 4)),
        ],
    );
    let staff = app.staff_token();
    let response = app.send(upload_folder("solo", &staff, body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let report = body_json(response).await;
    assert_eq!(report["chapters"][0]["number"], "10.5");
    assert_eq!(report["chapters"][0]["slug"], "10-5");
    assert_eq!(report["chapters"][0]["sliceCount"], 3);

    let chapter_id = report["chapters"][0]["chapterId"].as_i64().unwrap();
    let thumbnail = app.send(get(&format!("/thumbnails/{}", chapter_id))).await;
    assert_eq!(thumbnail.status(), StatusCode::OK);
    assert!(thumbnail
        .headers()
        .get("cache-control")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("public"));
    assert!(is_avif(&body_bytes(thumbnail).await));

    let reader = body_json(app.send(get("/works/solo/chapters/10-5")).await).await;
    assert_eq!(reader["chapter"]["number"], "10.5");
}

#[tokio::test]
async fn test_folder_upload_requires_chapter_number() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let body = multipart_body(&[], &[("files", "a.png", png(8, 8))]);
    let staff = app.staff_token();
    let response = app.send(upload_folder("solo", &staff, body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_folder_upload_without_images() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let body = multipart_body(
        &[("chapter_number", "3")],
        &[("files", "notes.txt", b"text".to_vec())],
    );
    let staff = app.staff_token();
    let response = app.send(upload_folder("solo", &staff, body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_upload");
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test]
async fn test_delete_chapter_removes_blobs() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 2).await;
    let staff = app.staff_token();

    let request = Request::builder()
        .method("DELETE")
        .uri("/admin/works/solo/chapters/2")
        .header(VIEWER_HEADER, &staff)
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["number"], "2");
    assert_eq!(body["removedSlices"], 2);

    let reader = app.send(get_as("/works/solo/chapters/2", &staff)).await;
    assert_eq!(reader.status(), StatusCode::NOT_FOUND);

    let paths = app.store.paths().await;
    assert!(paths.iter().all(|p| !p.starts_with("slices/solo/2/")));
    assert!(paths.iter().any(|p| p.starts_with("slices/solo/1/")));
}
