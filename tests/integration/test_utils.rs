//! Test utilities for integration tests.
//!
//! Builds a full router over an in-memory catalog and blob store, plus
//! helpers for image fixtures, chapter archives and viewer tokens.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use image::{ImageFormat, Rgb, RgbImage};
use tower::ServiceExt;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use astra_reader::server::{SESSION_HEADER, VIEWER_HEADER};
use astra_reader::{
    create_router, AppState, AvifSliceEncoder, Catalog, CredentialSource, IngestPipeline,
    LogNotifier, MemoryBlobStore, NewWork, RouterConfig, SignedUrlAuth, SiteSettings, SliceCache,
    SliceCipher, SliceService, TierConfig, ViewDeduper, ViewerClaims, Work,
};

pub const TEST_SECRET: &str = "test-secret-key-for-hmac-signing";

/// 32 bytes of 0x42, hex encoded.
pub const TEST_KEY_HEX: &str = "4242424242424242424242424242424242424242424242424242424242424242";

// =============================================================================
// Fixtures
// =============================================================================

/// Solid-colour PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 90]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Zip archive with the given `(path, data)` entries.
pub fn zip_of(entries: &[(&str, Vec<u8>)]) -> Bytes {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

/// Small strips and a fast encoder, so AVIF encoding stays quick.
pub fn test_settings() -> SiteSettings {
    SiteSettings {
        slice_height: 16,
        encoder: AvifSliceEncoder::new(30, 10),
        ..SiteSettings::default()
    }
}

/// Newest chapter waits a week; the one before it is already free.
pub fn timed_tier() -> TierConfig {
    TierConfig {
        default_chapters_are_vip: true,
        recent_vip_chapter_count: 2,
        vip_tier_size: 1,
        vip_base_release_days: 7,
        vip_days_decrease_per_tier: 7,
        ..TierConfig::default()
    }
}

// =============================================================================
// Test Application
// =============================================================================

pub struct TestApp {
    pub router: Router,
    pub catalog: Catalog,
    pub store: Arc<MemoryBlobStore>,
    pub ingest: Arc<IngestPipeline>,
    pub auth: SignedUrlAuth,
}

impl TestApp {
    /// Router with signed slice URLs and an encryption key.
    pub async fn new() -> Self {
        Self::build(RouterConfig::new(TEST_SECRET).with_tracing(false), true).await
    }

    pub async fn build(config: RouterConfig, encrypted: bool) -> Self {
        let catalog = Catalog::in_memory().await.unwrap();
        let store = Arc::new(MemoryBlobStore::new());
        let cipher = encrypted.then(|| Arc::new(SliceCipher::from_hex(TEST_KEY_HEX).unwrap()));
        let cache = Arc::new(SliceCache::with_capacity(8 * 1024 * 1024));

        let slices = SliceService::new(
            catalog.clone(),
            store.clone(),
            cipher.clone(),
            cache.clone(),
            ViewDeduper::new(1000),
        );
        let ingest = IngestPipeline::new(
            catalog.clone(),
            store.clone(),
            cipher,
            cache,
            Arc::new(LogNotifier),
            2,
        );
        let credentials = vec![CredentialSource::DatabaseFallback(catalog.pool().clone())];

        let auth = SignedUrlAuth::new(&config.auth_secret);
        let state = AppState::new(slices, ingest, test_settings(), credentials);
        let ingest = Arc::clone(&state.ingest);
        let router = create_router(state, config);

        Self {
            router,
            catalog,
            store,
            ingest,
            auth,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn create_work(&self, slug: &str, tier: TierConfig, coin_unlock_price: i64) -> Work {
        self.catalog
            .create_work(
                &NewWork {
                    slug: slug.to_string(),
                    title: slug.to_uppercase(),
                    tier,
                    coin_unlock_price,
                    donation_goal: 1000,
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    /// Ingest chapters `1..=count`, each one page tall enough for two strips.
    pub async fn publish_chapters(&self, work: &Work, count: usize) {
        for number in 1..=count {
            let archive = zip_of(&[(&format!("{}/001.png", number), png(8, 24))]);
            self.ingest
                .ingest_archive(&test_settings(), work, archive)
                .await
                .unwrap();
        }
    }

    pub fn token(&self, user: &str, staff: bool, subscription_until: Option<i64>) -> String {
        self.auth.sign_viewer(
            &ViewerClaims {
                user_id: user.to_string(),
                is_staff: staff,
                subscription_until,
                session_id: Some(format!("session-{}", user)),
            },
            Duration::from_secs(3600),
        )
    }

    pub fn staff_token(&self) -> String {
        self.token("staff-1", true, None)
    }

    pub fn subscriber_token(&self, user: &str) -> String {
        self.token(user, false, Some(Utc::now().timestamp() + 86_400))
    }
}

// =============================================================================
// Requests
// =============================================================================

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_as(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(VIEWER_HEADER, token)
        .body(Body::empty())
        .unwrap()
}

pub fn get_with_session(uri: &str, session: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(SESSION_HEADER, session)
        .body(Body::empty())
        .unwrap()
}

pub fn send_json(method: &str, uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(VIEWER_HEADER, token)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_as(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(VIEWER_HEADER, token)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

/// AVIF files carry an `ftyp` box with the `avif` brand.
pub fn is_avif(data: &[u8]) -> bool {
    data.len() > 12 && &data[4..8] == b"ftyp" && &data[8..12] == b"avif"
}
