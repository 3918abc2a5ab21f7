//! Router configuration for astra-reader.
//!
//! This module defines the HTTP routes and applies middleware for signed
//! slice URLs, upload limits and CORS.
//!
//! # Route Structure
//!
//! ```text
//! /health                                      - Health check (public)
//! /auth/providers                              - Identity providers (public)
//! /works/{slug}                                - Work summary
//! /works/{slug}/chapters                       - Chapter list with access decisions
//! /works/{slug}/chapters/{chapter}             - Reader payload
//! /works/{slug}/chapters/{chapter}/download    - Chapter zip (subscribers, staff)
//! /thumbnails/{chapter_id}                     - Chapter thumbnail (public)
//! /slices/{slice_id}                           - Slice bytes (signed URL)
//! /wallet, /wallet/unlock/{id}, /wallet/donate/{slug}
//! /admin/...                                   - Staff endpoints
//! ```
//!
//! # Example
//!
//! ```ignore
//! use astra_reader::server::{create_router, AppState, RouterConfig};
//!
//! let state = AppState::new(slices, ingest, settings, credentials);
//! let config = RouterConfig::new("my-secret-key")
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(state, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::admin::{
    create_work_handler, credit_wallet_handler, delete_chapter_handler, donate_handler,
    unlock_handler, update_work_handler, upload_archive_handler, upload_chapter_handler,
    wallet_handler,
};
use super::auth::{SignedUrlAuth, SESSION_HEADER, VIEWER_HEADER};
use super::handlers::{
    chapters_handler, download_handler, health_handler, providers_handler, reader_handler,
    slice_handler, thumbnail_handler, work_handler, AppState,
};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Secret for signed slice URLs and viewer tokens
    pub auth_secret: String,

    /// Whether slice requests must carry a valid signature
    pub auth_enabled: bool,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a new router configuration with the given auth secret.
    ///
    /// By default:
    /// - Signed slice URLs are enforced
    /// - CORS allows any origin
    /// - Tracing is enabled
    pub fn new(auth_secret: impl Into<String>) -> Self {
        Self {
            auth_secret: auth_secret.into(),
            auth_enabled: true,
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Create a configuration with slice signatures disabled.
    ///
    /// Viewer tokens are still verified, against an empty secret.
    ///
    /// **Warning**: This should only be used for development/testing.
    pub fn without_auth() -> Self {
        Self {
            auth_secret: String::new(),
            auth_enabled: false,
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_auth_enabled(mut self, enabled: bool) -> Self {
        self.auth_enabled = enabled;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// `/slices` sits behind the signature middleware when auth is enabled;
/// viewer identity on every other route comes from the `X-Astra-Viewer`
/// header. Admin routes accept bodies up to `max_upload_bytes`.
pub fn create_router(state: AppState, config: RouterConfig) -> Router {
    let auth = SignedUrlAuth::new(&config.auth_secret);
    let state = state.with_auth(auth.clone(), config.auth_enabled);
    let upload_limit = state.settings.max_upload_bytes;

    let cors = build_cors_layer(&config);

    // Auth middleware is applied AFTER nesting so it sees the full /slices/... path
    let slice_routes = Router::new().route("/{slice_id}", get(slice_handler));
    let slice_routes = if config.auth_enabled {
        Router::new()
            .nest("/slices", slice_routes)
            .layer(middleware::from_fn_with_state(
                auth,
                super::auth::auth_middleware,
            ))
    } else {
        Router::new().nest("/slices", slice_routes)
    };

    let reader_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/auth/providers", get(providers_handler))
        .route("/works/{slug}", get(work_handler))
        .route("/works/{slug}/chapters", get(chapters_handler))
        .route("/works/{slug}/chapters/{chapter}", get(reader_handler))
        .route(
            "/works/{slug}/chapters/{chapter}/download",
            get(download_handler),
        )
        .route("/thumbnails/{chapter_id}", get(thumbnail_handler));

    let wallet_routes = Router::new()
        .route("/wallet", get(wallet_handler))
        .route("/wallet/unlock/{chapter_id}", post(unlock_handler))
        .route("/wallet/donate/{slug}", post(donate_handler));

    let admin_routes = Router::new()
        .route("/works", post(create_work_handler))
        .route("/works/{slug}", put(update_work_handler))
        .route("/works/{slug}/archive", post(upload_archive_handler))
        .route("/works/{slug}/chapters", post(upload_chapter_handler))
        .route(
            "/works/{slug}/chapters/{chapter}",
            delete(delete_chapter_handler),
        )
        .route("/wallets/{user_id}/credit", post(credit_wallet_handler))
        .layer(DefaultBodyLimit::max(upload_limit));

    let router = Router::new()
        .merge(reader_routes)
        .merge(slice_routes)
        .merge(wallet_routes)
        .nest("/admin", admin_routes)
        .with_state(state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static(VIEWER_HEADER),
            HeaderName::from_static(SESSION_HEADER),
        ])
        .expose_headers([HeaderName::from_static("x-slice-cache-hit")])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

/// Create a development router with slice signatures disabled.
///
/// **Warning**: This should only be used for local development and testing.
pub fn create_dev_router(state: AppState) -> Router {
    create_router(state, RouterConfig::without_auth())
}
