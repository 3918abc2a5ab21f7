//! HTTP server layer for astra-reader.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   /works/...   /slices/{id}?exp&sig   /wallet/...   /admin/...  │
//! │                                                                 │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────┐  ┌───────────┐  │
//! │  │  handlers   │  │     auth     │  │  admin  │  │  routes   │  │
//! │  │  (reader)   │  │ (signatures, │  │ (staff, │  │ (router)  │  │
//! │  │             │  │  viewers)    │  │ wallet) │  │           │  │
//! │  └─────────────┘  └──────────────┘  └─────────┘  └───────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod admin;
pub mod auth;
pub mod handlers;
pub mod routes;

pub use admin::{AmountRequest, BalanceResponse, DeleteChapterResponse};
pub use auth::{
    auth_middleware, AccountViewer, AuthError, CurrentViewer, SignedUrlAuth, StaffViewer,
    ViewerClaims, SESSION_HEADER, VIEWER_HEADER,
};
pub use handlers::{
    ApiError, AppState, ChapterListResponse, ErrorResponse, HealthResponse, ReaderResponse,
    WorkResponse,
};
pub use routes::{create_dev_router, create_router, RouterConfig};
