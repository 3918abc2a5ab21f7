//! Configuration for the astra-reader binary.
//!
//! Every option can be passed on the command line or through an environment
//! variable with the `ASTRA_` prefix:
//!
//! - `ASTRA_HOST` / `ASTRA_PORT` - Bind address (default: 0.0.0.0:3000)
//! - `ASTRA_DATABASE_URL` - SQLite database (default: sqlite://astra.db)
//! - `ASTRA_STORAGE` - Blob backend: `local`, `s3` or `memory` (default: local)
//! - `ASTRA_STORAGE_ROOT` - Root directory of the local backend
//! - `ASTRA_S3_BUCKET` / `ASTRA_S3_PREFIX` / `ASTRA_S3_ENDPOINT` / `ASTRA_S3_REGION`
//! - `ASTRA_AUTH_SECRET` / `ASTRA_AUTH_ENABLED` - HMAC secret for signed URLs and viewer tokens
//! - `ASTRA_ENCRYPTION_KEY` - 64 hex characters; slices are stored in plain text without it
//! - `ASTRA_SLICE_HEIGHT` - Strip height for tall pages (default: 1600)
//! - `ASTRA_AVIF_QUALITY` / `ASTRA_AVIF_SPEED` - AVIF encoder settings (default: 55 / 7)
//! - `ASTRA_OAUTH_DISCORD_CLIENT_ID` and friends - Identity provider credentials
//!
//! The per-request [`SiteSettings`] snapshot is derived from these.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::catalog::DEFAULT_MAX_CONNECTIONS;
use crate::credentials::{OAuthCredentials, OAuthProvider};
use crate::crypto::SliceCipher;
use crate::ingest::DEFAULT_SLICE_HEIGHT;
use crate::slice::{
    AvifSliceEncoder, DEFAULT_AVIF_QUALITY, DEFAULT_AVIF_SPEED, DEFAULT_SLICE_CACHE_CAPACITY,
    DEFAULT_VIEW_DEDUP_CAPACITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default catalog database.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://astra.db";

/// Default root of the local blob store.
pub const DEFAULT_STORAGE_ROOT: &str = "media";

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default lifetime of signed slice URLs, in seconds.
pub const DEFAULT_SLICE_URL_TTL: u64 = 3600;

/// Default largest accepted upload (512MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Default number of uploads processed at once.
pub const DEFAULT_MAX_CONCURRENT_INGESTS: usize = 2;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Default viewer token lifetime for `sign`, in seconds (1 day).
pub const DEFAULT_TOKEN_TTL: u64 = 86_400;

// =============================================================================
// CLI
// =============================================================================

/// astra-reader - chapter catalog and reader backend.
#[derive(Parser, Debug, Clone)]
#[command(name = "astra-reader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeConfig),

    /// Ingest a chapter archive into a work without starting the server
    Ingest(IngestConfig),

    /// Mint a signed viewer token
    Sign(SignConfig),

    /// Validate configuration and probe the database and storage
    Check(CheckConfig),
}

// =============================================================================
// Shared Arguments
// =============================================================================

/// Where blobs live.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
    /// Process memory; everything is lost on exit
    Memory,
}

/// Database and blob storage location.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// SQLite database URL. `sqlite::memory:` keeps the catalog in memory.
    #[arg(long, default_value = DEFAULT_DATABASE_URL, env = "ASTRA_DATABASE_URL")]
    pub database_url: String,

    /// Maximum database connections.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "ASTRA_DATABASE_CONNECTIONS")]
    pub database_connections: u32,

    /// Blob storage backend.
    #[arg(long, value_enum, default_value_t = StorageBackend::Local, env = "ASTRA_STORAGE")]
    pub storage: StorageBackend,

    /// Root directory for the local backend.
    #[arg(long, default_value = DEFAULT_STORAGE_ROOT, env = "ASTRA_STORAGE_ROOT")]
    pub storage_root: PathBuf,

    /// S3 bucket for the s3 backend.
    #[arg(long, env = "ASTRA_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix inside the bucket.
    #[arg(long, env = "ASTRA_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, R2, etc.).
    #[arg(long, env = "ASTRA_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "ASTRA_S3_REGION")]
    pub s3_region: String,
}

impl StoreArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.trim().is_empty() {
            return Err("Database URL is required. Set --database-url or ASTRA_DATABASE_URL".to_string());
        }
        if self.database_connections == 0 {
            return Err("database_connections must be greater than 0".to_string());
        }
        if self.storage == StorageBackend::S3 && self.bucket().is_none() {
            return Err(
                "S3 storage selected but no bucket given. Set --s3-bucket or ASTRA_S3_BUCKET"
                    .to_string(),
            );
        }
        Ok(())
    }

    /// Bucket name, ignoring blank values.
    pub fn bucket(&self) -> Option<&str> {
        self.s3_bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    pub fn is_memory_database(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

/// Image processing settings.
#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    /// Pages taller than this are cut into strips of this height.
    #[arg(long, default_value_t = DEFAULT_SLICE_HEIGHT, env = "ASTRA_SLICE_HEIGHT")]
    pub slice_height: u32,

    /// AVIF quality (1-100).
    #[arg(long, default_value_t = DEFAULT_AVIF_QUALITY, env = "ASTRA_AVIF_QUALITY")]
    pub avif_quality: u8,

    /// AVIF encoder speed (1-10).
    #[arg(long, default_value_t = DEFAULT_AVIF_SPEED, env = "ASTRA_AVIF_SPEED")]
    pub avif_speed: u8,

    /// Slice encryption key as 64 hex characters.
    ///
    /// Without a key, new slices are stored unencrypted.
    #[arg(long, env = "ASTRA_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Uploads processed at the same time.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_INGESTS, env = "ASTRA_MAX_CONCURRENT_INGESTS")]
    pub max_concurrent_ingests: usize,
}

impl ImageArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.slice_height == 0 {
            return Err("slice_height must be greater than 0".to_string());
        }
        if self.avif_quality == 0 || self.avif_quality > 100 {
            return Err("avif_quality must be between 1 and 100".to_string());
        }
        if self.avif_speed == 0 || self.avif_speed > 10 {
            return Err("avif_speed must be between 1 and 10".to_string());
        }
        if self.max_concurrent_ingests == 0 {
            return Err("max_concurrent_ingests must be greater than 0".to_string());
        }
        self.cipher().map(|_| ())
    }

    pub fn encoder(&self) -> AvifSliceEncoder {
        AvifSliceEncoder::new(self.avif_quality, self.avif_speed)
    }

    /// The slice cipher, if a key is configured.
    pub fn cipher(&self) -> Result<Option<SliceCipher>, String> {
        match self.encryption_key.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(key) => SliceCipher::from_hex(key)
                .map(Some)
                .map_err(|e| format!("{} (ASTRA_ENCRYPTION_KEY)", e)),
        }
    }
}

/// Identity provider credentials from configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct OAuthArgs {
    #[arg(long, env = "ASTRA_OAUTH_DISCORD_CLIENT_ID")]
    pub oauth_discord_client_id: Option<String>,

    #[arg(long, env = "ASTRA_OAUTH_DISCORD_SECRET", hide_env_values = true)]
    pub oauth_discord_secret: Option<String>,

    #[arg(long, env = "ASTRA_OAUTH_GOOGLE_CLIENT_ID")]
    pub oauth_google_client_id: Option<String>,

    #[arg(long, env = "ASTRA_OAUTH_GOOGLE_SECRET", hide_env_values = true)]
    pub oauth_google_secret: Option<String>,
}

impl OAuthArgs {
    /// Providers with both a client id and a secret configured.
    pub fn credentials(&self) -> HashMap<OAuthProvider, OAuthCredentials> {
        let pairs = [
            (
                OAuthProvider::Discord,
                &self.oauth_discord_client_id,
                &self.oauth_discord_secret,
            ),
            (
                OAuthProvider::Google,
                &self.oauth_google_client_id,
                &self.oauth_google_secret,
            ),
        ];

        pairs
            .into_iter()
            .filter_map(|(provider, client_id, secret)| {
                let client_id = client_id.as_deref()?.trim();
                let secret = secret.as_deref()?.trim();
                if client_id.is_empty() || secret.is_empty() {
                    return None;
                }
                Some((
                    provider,
                    OAuthCredentials {
                        client_id: client_id.to_string(),
                        secret: secret.to_string(),
                    },
                ))
            })
            .collect()
    }
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "ASTRA_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "ASTRA_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub image: ImageArgs,

    #[command(flatten)]
    pub oauth: OAuthArgs,

    /// Secret for signed slice URLs and viewer tokens.
    #[arg(long, env = "ASTRA_AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    /// Require signatures on slice URLs and viewer tokens.
    ///
    /// WARNING: with auth disabled, viewer identity is taken from unsigned
    /// tokens. Only disable in development.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "ASTRA_AUTH_ENABLED")]
    pub auth_enabled: bool,

    /// Lifetime of signed slice URLs, in seconds.
    #[arg(long, default_value_t = DEFAULT_SLICE_URL_TTL, env = "ASTRA_SLICE_URL_TTL")]
    pub slice_url_ttl: u64,

    /// Decrypted slice cache size in bytes.
    #[arg(long, default_value_t = DEFAULT_SLICE_CACHE_CAPACITY, env = "ASTRA_CACHE_SLICES")]
    pub cache_slices: usize,

    /// Remembered (session, chapter) pairs for view counting.
    #[arg(long, default_value_t = DEFAULT_VIEW_DEDUP_CAPACITY, env = "ASTRA_VIEW_DEDUP_CAPACITY")]
    pub view_dedup_capacity: usize,

    /// Largest accepted upload body, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "ASTRA_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: usize,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "ASTRA_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated). Any origin if unset.
    #[arg(long, env = "ASTRA_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_enabled && self.auth_secret_or_empty().is_empty() {
            return Err(
                "Authentication is enabled but no secret provided. \
                 Set --auth-secret or ASTRA_AUTH_SECRET, or disable auth with --auth-enabled=false"
                    .to_string(),
            );
        }
        self.store.validate()?;
        self.image.validate()?;

        if self.slice_url_ttl == 0 {
            return Err("slice_url_ttl must be greater than 0".to_string());
        }
        if self.view_dedup_capacity == 0 {
            return Err("view_dedup_capacity must be greater than 0".to_string());
        }
        if self.max_upload_bytes < 1024 {
            return Err("max_upload_bytes must be at least 1KB".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn auth_secret_or_empty(&self) -> &str {
        self.auth_secret.as_deref().unwrap_or("")
    }

    pub fn site_settings(&self) -> SiteSettings {
        SiteSettings {
            slice_height: self.image.slice_height,
            encoder: self.image.encoder(),
            slice_url_ttl: Duration::from_secs(self.slice_url_ttl),
            cache_max_age: self.cache_max_age,
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

// =============================================================================
// Ingest
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct IngestConfig {
    /// Slug of the work receiving the chapters.
    pub work: String,

    /// Path to the chapter archive (zip).
    pub archive: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub image: ImageArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.work.trim().is_empty() {
            return Err("Work slug is required".to_string());
        }
        if self.store.storage == StorageBackend::Memory || self.store.is_memory_database() {
            return Err("Offline ingestion needs persistent storage and database".to_string());
        }
        self.store.validate()?;
        self.image.validate()
    }

    pub fn site_settings(&self) -> SiteSettings {
        SiteSettings {
            slice_height: self.image.slice_height,
            encoder: self.image.encoder(),
            ..SiteSettings::default()
        }
    }
}

// =============================================================================
// Sign
// =============================================================================

/// Output format for `sign`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignOutputFormat {
    /// Token only, ready for the `X-Astra-Viewer` header
    #[default]
    Token,
    /// JSON object with the token and its expiry
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct SignConfig {
    /// Secret shared with the server.
    #[arg(long, env = "ASTRA_AUTH_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Account id of the viewer.
    #[arg(long)]
    pub user: String,

    /// Mark the viewer as staff.
    #[arg(long, default_value_t = false)]
    pub staff: bool,

    /// Subscription end as Unix seconds.
    #[arg(long)]
    pub subscription_until: Option<i64>,

    /// Reader session id.
    #[arg(long)]
    pub session: Option<String>,

    /// Token lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL)]
    pub ttl: u64,

    #[arg(long, value_enum, default_value_t = SignOutputFormat::Token)]
    pub format: SignOutputFormat,
}

impl SignConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("Secret must not be empty".to_string());
        }
        if self.user.trim().is_empty() {
            return Err("User id must not be empty".to_string());
        }
        if self.ttl == 0 {
            return Err("ttl must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Check
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub oauth: OAuthArgs,

    /// Slice encryption key to validate.
    #[arg(long, env = "ASTRA_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Print a freshly generated encryption key.
    #[arg(long, default_value_t = false)]
    pub generate_key: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Site Settings
// =============================================================================

/// Settings read by request handlers and ingestion.
///
/// Shared as an immutable `Arc` snapshot; an operation keeps the snapshot it
/// started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSettings {
    pub slice_height: u32,
    pub encoder: AvifSliceEncoder,
    pub slice_url_ttl: Duration,
    pub cache_max_age: u32,
    pub max_upload_bytes: usize,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            slice_height: DEFAULT_SLICE_HEIGHT,
            encoder: AvifSliceEncoder::default(),
            slice_url_ttl: Duration::from_secs(DEFAULT_SLICE_URL_TTL),
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}
