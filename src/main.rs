//! astra-reader - chapter catalog and reader backend.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use astra_reader::{
    catalog::Catalog,
    config::{
        CheckConfig, Cli, Command, IngestConfig, ServeConfig, SignConfig, SignOutputFormat,
        StorageBackend, StoreArgs,
    },
    credentials::{configured_providers, CredentialSource},
    crypto::SliceCipher,
    error::{CatalogError, StorageError},
    events::{drain_outbox, LogNotifier},
    ingest::IngestPipeline,
    io::{create_s3_client, BlobStore, LocalBlobStore, MemoryBlobStore, S3BlobStore},
    server::{create_router, AppState, RouterConfig, SignedUrlAuth, ViewerClaims},
    slice::{SliceCache, SliceService, ViewDeduper},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Ingest(config) => run_ingest(config).await,
        Command::Sign(config) => run_sign(config),
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    info!("Configuration:");
    info!("  Database: {}", config.store.database_url);
    info!("  Storage: {:?}", config.store.storage);
    if let Some(bucket) = config.store.bucket() {
        info!("  S3 bucket: {}", bucket);
    }
    if let Some(ref endpoint) = config.store.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }

    if config.auth_enabled {
        info!("  Auth: enabled (slice URLs valid for {}s)", config.slice_url_ttl);
    } else {
        warn!("  Auth: DISABLED - slice URLs are unsigned");
        warn!("        Enable for production: --auth-enabled --auth-secret=<secret>");
    }

    let cipher = match config.image.cipher() {
        Ok(cipher) => cipher.map(Arc::new),
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if cipher.is_some() {
        info!("  Encryption: enabled");
    } else {
        warn!("  Encryption: DISABLED - new slices are stored in plain text");
    }

    info!(
        "  Slices: {}px strips, AVIF quality {} speed {}",
        config.image.slice_height, config.image.avif_quality, config.image.avif_speed
    );
    info!("  Cache: {}MB decrypted slices", config.cache_slices / (1024 * 1024));

    let catalog = match open_catalog(&config.store).await {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("");
    info!("Connecting to storage...");
    let store = match open_blob_store(&config.store).await {
        Ok(store) => {
            info!("  Connected to {}", store.identifier());
            store
        }
        Err(e) => {
            error!("  Failed to open storage: {}", e);
            error!("");
            error!("  Please check:");
            error!("    - The storage root is writable, or");
            error!("    - Your AWS credentials and bucket are configured correctly");
            return ExitCode::FAILURE;
        }
    };

    // Events left undelivered by a previous run
    match drain_outbox(catalog.pool(), &LogNotifier, chrono::Utc::now()).await {
        Ok(0) => {}
        Ok(n) => info!("  Delivered {} pending event(s)", n),
        Err(e) => warn!("  Failed to drain event outbox: {}", e),
    }

    let cache = Arc::new(SliceCache::with_capacity(config.cache_slices));
    let slices = SliceService::new(
        catalog.clone(),
        Arc::clone(&store),
        cipher.clone(),
        Arc::clone(&cache),
        ViewDeduper::new(config.view_dedup_capacity),
    );
    let ingest = IngestPipeline::new(
        catalog.clone(),
        store,
        cipher,
        cache,
        Arc::new(LogNotifier),
        config.image.max_concurrent_ingests,
    );
    let credentials = vec![
        CredentialSource::ConfigStore(config.oauth.credentials()),
        CredentialSource::DatabaseFallback(catalog.pool().clone()),
    ];

    let state = AppState::new(slices, ingest, config.site_settings(), credentials);
    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/works/<slug>/chapters", addr);
    info!("");
    info!("  Mint a viewer token for testing:");
    info!("    astra-reader sign --secret <secret> --user <id> --staff");
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!(" █████╗ ███████╗████████╗██████╗  █████╗ ");
    info!("██╔══██╗██╔════╝╚══██╔══╝██╔══██╗██╔══██╗");
    info!("███████║███████╗   ██║   ██████╔╝███████║");
    info!("██╔══██║╚════██║   ██║   ██╔══██╗██╔══██║");
    info!("██║  ██║███████║   ██║   ██║  ██║██║  ██║");
    info!("╚═╝  ╚═╝╚══════╝   ╚═╝   ╚═╝  ╚═╝╚═╝  ╚═╝");
    info!("");
    info!("                 reader v{}", version);
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "astra_reader=debug,tower_http=debug"
    } else {
        "astra_reader=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = if config.auth_enabled {
        RouterConfig::new(config.auth_secret_or_empty())
    } else {
        RouterConfig::without_auth()
    };

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

async fn open_catalog(store: &StoreArgs) -> Result<Catalog, CatalogError> {
    if store.is_memory_database() {
        warn!("  Database: in memory - the catalog is lost on exit");
        Catalog::in_memory().await
    } else {
        Catalog::connect(&store.database_url, store.database_connections).await
    }
}

/// Open the configured blob store. S3 connectivity is probed up front.
async fn open_blob_store(store: &StoreArgs) -> Result<Arc<dyn BlobStore>, StorageError> {
    match store.storage {
        StorageBackend::Local => {
            tokio::fs::create_dir_all(&store.storage_root)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
            Ok(Arc::new(LocalBlobStore::new(&store.storage_root)))
        }
        StorageBackend::S3 => {
            let bucket = store
                .bucket()
                .ok_or_else(|| StorageError::S3("no bucket configured".to_string()))?;
            let client = create_s3_client(store.s3_endpoint.as_deref(), &store.s3_region).await;
            let s3 = S3BlobStore::new(client, bucket, store.s3_prefix.as_deref());
            s3.probe().await?;
            Ok(Arc::new(s3))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryBlobStore::new())),
    }
}

// =============================================================================
// Ingest Command
// =============================================================================

async fn run_ingest(config: IngestConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let archive = match tokio::fs::read(&config.archive).await {
        Ok(data) => bytes::Bytes::from(data),
        Err(e) => {
            error!("Failed to read {}: {}", config.archive.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let cipher = match config.image.cipher() {
        Ok(cipher) => cipher.map(Arc::new),
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let catalog = match open_catalog(&config.store).await {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let work = match catalog.work_by_slug(&config.work).await {
        Ok(work) => work,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let store = match open_blob_store(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Nothing is served from here; the cache only exists for invalidation
    let pipeline = IngestPipeline::new(
        catalog,
        store,
        cipher,
        Arc::new(SliceCache::with_capacity(0)),
        Arc::new(LogNotifier),
        config.image.max_concurrent_ingests,
    );

    let settings = config.site_settings();
    match pipeline.ingest_archive(&settings, &work, archive).await {
        Ok(report) => {
            println!("Ingested {}", archive_name(&config.archive));
            for chapter in &report.chapters {
                let verb = if chapter.created { "created" } else { "replaced" };
                println!(
                    "  ✓ Chapter {} ({} slices, {})",
                    chapter.number, chapter.slice_count, verb
                );
            }
            for skipped in &report.skipped {
                println!(
                    "  ✗ {}/{}: {}",
                    skipped.chapter, skipped.filename, skipped.reason
                );
            }
            if report.ignored_entries > 0 {
                println!("  ({} archive entries ignored)", report.ignored_entries);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Ingestion failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn archive_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// =============================================================================
// Sign Command
// =============================================================================

fn run_sign(config: SignConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let auth = SignedUrlAuth::new(&config.secret);
    let claims = ViewerClaims {
        user_id: config.user.clone(),
        is_staff: config.staff,
        subscription_until: config.subscription_until,
        session_id: config.session.clone(),
    };
    let ttl = Duration::from_secs(config.ttl);
    let token = auth.sign_viewer(&claims, ttl);

    match config.format {
        SignOutputFormat::Token => {
            println!("{}", token);
        }
        SignOutputFormat::Json => {
            let expires_at = chrono::Utc::now().timestamp() + config.ttl as i64;
            let json = serde_json::json!({
                "header": "X-Astra-Viewer",
                "token": token,
                "user": config.user,
                "staff": config.staff,
                "subscriptionUntil": config.subscription_until,
                "expiresAt": expires_at,
            });
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if config.generate_key {
        println!("{}", SliceCipher::generate_hex());
        return ExitCode::SUCCESS;
    }

    println!("astra-reader Configuration Check");
    println!("═════════════════════════════════");
    println!();

    if let Err(e) = config.store.validate() {
        println!("✗ Store: {}", e);
        return ExitCode::FAILURE;
    }

    match config.encryption_key.as_deref().map(str::trim) {
        None | Some("") => println!("! Encryption key: not set, slices stored in plain text"),
        Some(key) => match SliceCipher::from_hex(key) {
            Ok(_) => println!("✓ Encryption key: valid"),
            Err(e) => {
                println!("✗ Encryption key: {}", e);
                println!();
                println!("Tip: Use --generate-key to create one");
                return ExitCode::FAILURE;
            }
        },
    }

    print!("Opening database {}... ", config.store.database_url);
    let catalog = match open_catalog(&config.store).await {
        Ok(catalog) => {
            println!("✓ success");
            catalog
        }
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match catalog.list_works().await {
        Ok(works) => println!("  {} work(s) in catalog", works.len()),
        Err(e) => println!("  Error listing works: {}", e),
    }

    print!("Opening storage... ");
    match open_blob_store(&config.store).await {
        Ok(store) => println!("✓ {}", store.identifier()),
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            println!();
            println!("Please check:");
            if config.store.storage == StorageBackend::S3 {
                println!("  - Your AWS credentials are configured correctly");
                println!("  - The bucket exists and is accessible");
                if config.store.s3_endpoint.is_some() {
                    println!("  - The S3 endpoint is correct and reachable");
                }
            } else {
                println!("  - The storage root can be created and written");
            }
            return ExitCode::FAILURE;
        }
    }

    let sources = vec![
        CredentialSource::ConfigStore(config.oauth.credentials()),
        CredentialSource::DatabaseFallback(catalog.pool().clone()),
    ];
    match configured_providers(&sources).await {
        Ok(providers) if providers.is_empty() => println!("! Login providers: none configured"),
        Ok(providers) => {
            let names: Vec<&str> = providers.iter().map(|p| p.as_str()).collect();
            println!("✓ Login providers: {}", names.join(", "));
        }
        Err(e) => println!("✗ Login providers: {}", e),
    }

    println!();
    println!("═════════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
