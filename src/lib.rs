//! # astra-reader
//!
//! Chapter catalog and reader backend for a manga site.
//!
//! Works are published chapter by chapter. The newest chapters sit behind a
//! VIP paywall that lifts on a tiered schedule; subscribers, staff and
//! viewers who bought a chapter with coins read everything. Chapter images
//! are cut into AVIF strips at upload, encrypted at rest and served through
//! short-lived signed URLs.
//!
//! ## Features
//!
//! - **Tiered VIP release**: per-work schedule where older tiers unlock sooner
//! - **AVIF slicing**: tall pages cut into fixed-height strips at ingestion
//! - **Encryption at rest**: XChaCha20-Poly1305, bound to each blob's path
//! - **Coin wallet**: permanent chapter unlocks and donation goals
//! - **Signed URLs**: HMAC-SHA256 slice URLs and viewer tokens
//!
//! ## Architecture
//!
//! - [`catalog`] - Works, chapters and slices in SQLite
//! - [`policy`] - Access decisions from the release schedule
//! - [`ingest`] - Archive and folder uploads to encrypted slices
//! - [`slice`] - Encoding, caching and serving of slices
//! - [`wallet`] - Coin balances, unlocks and donations
//! - [`events`] - Transactional outbox for publish notifications
//! - [`io`] - Blob storage (local, S3, memory)
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use astra_reader::{
//!     create_router, AppState, Catalog, IngestPipeline, LogNotifier, MemoryBlobStore,
//!     RouterConfig, SiteSettings, SliceCache, SliceService, ViewDeduper,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Catalog::in_memory().await?;
//!     let store = Arc::new(MemoryBlobStore::new());
//!     let cache = Arc::new(SliceCache::with_capacity(64 * 1024 * 1024));
//!
//!     let slices = SliceService::new(
//!         catalog.clone(),
//!         store.clone(),
//!         None,
//!         cache.clone(),
//!         ViewDeduper::new(10_000),
//!     );
//!     let ingest = IngestPipeline::new(catalog, store, None, cache, Arc::new(LogNotifier), 2);
//!
//!     let state = AppState::new(slices, ingest, SiteSettings::default(), Vec::new());
//!     let router = create_router(state, RouterConfig::new("my-secret-key"));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod events;
pub mod ingest;
pub mod io;
pub mod policy;
pub mod server;
pub mod slice;
pub mod wallet;

// Re-export commonly used types
pub use catalog::{
    Catalog, Chapter, ChapterKey, DeletedChapter, ImageSlice, NewWork, TierConfig, Work,
    WorkUpdate,
};
pub use config::{
    CheckConfig, Cli, Command, IngestConfig, ServeConfig, SignConfig, SignOutputFormat,
    SiteSettings,
};
pub use credentials::{CredentialSource, OAuthCredentials, OAuthProvider};
pub use crypto::SliceCipher;
pub use error::{
    AccessPolicyError, CatalogError, CredentialError, CryptoError, IngestError, LedgerError,
    SliceError, StorageError,
};
pub use events::{ChapterEvent, LogNotifier, Notifier, OutboxEvent};
pub use ingest::{IngestPipeline, IngestReport, UploadedFile};
pub use io::{create_s3_client, BlobStore, LocalBlobStore, MemoryBlobStore, S3BlobStore};
pub use policy::{evaluate, AccessDecision, ChapterSchedule, Viewer};
pub use server::{
    create_dev_router, create_router, AppState, ErrorResponse, RouterConfig, SignedUrlAuth,
    ViewerClaims,
};
pub use slice::{AvifSliceEncoder, SliceCache, SliceService, ViewDeduper};
pub use wallet::{DonationReceipt, Ledger, UnlockReceipt};
