//! Authentication integration tests.
//!
//! Tests verify:
//! - Signed slice URLs work; expired, forged or reused signatures do not
//! - Missing auth parameters are handled
//! - Viewer tokens are verified and tampering is rejected
//! - With auth disabled, slice URLs are plain paths

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{Request, StatusCode};

use astra_reader::server::VIEWER_HEADER;
use astra_reader::{RouterConfig, SignedUrlAuth, TierConfig};

use super::test_utils::{body_json, get, get_as, TestApp, TEST_SECRET};

/// Publish one chapter and return the first slice id and its signed URL.
async fn first_slice(app: &TestApp) -> (i64, String) {
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 1).await;

    let body = body_json(app.send(get("/works/solo/chapters/1")).await).await;
    let id = body["slices"][0]["id"].as_i64().unwrap();
    let url = body["slices"][0]["url"].as_str().unwrap().to_string();
    (id, url)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

// =============================================================================
// Signed Slice URLs
// =============================================================================

#[tokio::test]
async fn test_valid_signature_succeeds() {
    let app = TestApp::new().await;
    let (id, _) = first_slice(&app).await;

    let auth = SignedUrlAuth::new(TEST_SECRET);
    let path = format!("/slices/{}", id);
    let (signature, expiry) = auth.sign_with_params(&path, Duration::from_secs(60), &[]);

    let response = app
        .send(get(&format!("{}?sig={}&exp={}", path, signature, expiry)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_signature_rejected() {
    let app = TestApp::new().await;
    let (id, _) = first_slice(&app).await;

    let response = app.send(get(&format!("/slices/{}", id))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "missing_signature");

    let response = app
        .send(get(&format!("/slices/{}?sig=abcd", id)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "missing_expiry");
}

#[tokio::test]
async fn test_expired_signature_rejected() {
    let app = TestApp::new().await;
    let (id, _) = first_slice(&app).await;

    let auth = SignedUrlAuth::new(TEST_SECRET);
    let path = format!("/slices/{}", id);
    let expiry = now_secs() - 10;
    let signature = auth.sign_with_expiry_and_params(&path, expiry, &[]);

    let response = app
        .send(get(&format!("{}?sig={}&exp={}", path, signature, expiry)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "signature_expired");
}

#[tokio::test]
async fn test_wrong_secret_rejected() {
    let app = TestApp::new().await;
    let (id, _) = first_slice(&app).await;

    let auth = SignedUrlAuth::new("some-other-secret");
    let path = format!("/slices/{}", id);
    let (signature, expiry) = auth.sign_with_params(&path, Duration::from_secs(60), &[]);

    let response = app
        .send(get(&format!("{}?sig={}&exp={}", path, signature, expiry)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_signature");
}

#[tokio::test]
async fn test_signature_bound_to_slice() {
    let app = TestApp::new().await;
    let (id, url) = first_slice(&app).await;

    // Reuse the query of one slice for its neighbour
    let query = url.split_once('?').unwrap().1;
    let response = app
        .send(get(&format!("/slices/{}?{}", id + 1, query)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_extended_expiry_rejected() {
    let app = TestApp::new().await;
    let (id, url) = first_slice(&app).await;

    let sig = url.rsplit_once("sig=").unwrap().1.to_string();
    let response = app
        .send(get(&format!(
            "/slices/{}?exp={}&sig={}",
            id,
            now_secs() + 100_000,
            sig
        )))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_signature_is_bad_request() {
    let app = TestApp::new().await;
    let (id, _) = first_slice(&app).await;

    let response = app
        .send(get(&format!("/slices/{}?exp={}&sig=not-hex", id, now_secs() + 60)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unsigned_urls_without_auth() {
    let app = TestApp::build(RouterConfig::without_auth().with_tracing(false), false).await;
    let (id, url) = first_slice(&app).await;

    assert_eq!(url, format!("/slices/{}", id));
    assert_eq!(app.send(get(&url)).await.status(), StatusCode::OK);
}

// =============================================================================
// Viewer Tokens
// =============================================================================

#[tokio::test]
async fn test_tampered_viewer_token_rejected() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let token = app.token("reader-1", false, None);
    let forged = token.replace("staff=0", "staff=1");
    assert_ne!(token, forged);

    let response = app.send(get_as("/works/solo/chapters", &forged)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_signature");

    let response = app.send(get_as("/works/solo/chapters", &token)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_from_other_secret_rejected() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let foreign = TestApp::build(RouterConfig::new("another-secret"), true).await;
    let token = foreign.staff_token();

    let request = Request::builder()
        .uri("/works/solo/chapters")
        .header(VIEWER_HEADER, token)
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(request).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_garbage_viewer_token_rejected() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;

    let response = app.send(get_as("/works/solo/chapters", "hello")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// CORS
// =============================================================================

#[tokio::test]
async fn test_cors_preflight_allows_viewer_header() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/works/solo/chapters")
        .header("origin", "https://reader.example")
        .header("access-control-request-method", "GET")
        .header("access-control-request-headers", "x-astra-viewer")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    let allowed = response
        .headers()
        .get("access-control-allow-headers")
        .unwrap()
        .to_str()
        .unwrap()
        .to_lowercase();
    assert!(allowed.contains("x-astra-viewer"));
}
