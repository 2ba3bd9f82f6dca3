//! Image pipeline server.
//!
//! This binary starts the HTTP server and configures all components, or
//! issues bearer tokens for it.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image_pipeline::{
    auth::{AccessPolicy, SigningKeys, TokenService},
    cache::DerivativeCache,
    config::{Cli, Command, ServeConfig, StorageKind, TokenConfig},
    pipeline::Pipeline,
    server::{create_router, RouterConfig},
    store::{create_s3_client, AssetStore, BlobBackend, FsBackend, MemoryBackend, S3Backend},
    transcode::{FallbackPolicy, ImageTranscoder, TranscodePool},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => run_serve(config).await,
        Command::Token(config) => run_token(config),
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

    let keys = match signing_keys(&config) {
        Ok(keys) => keys,
        Err(e) => {
            error!("Invalid signing key: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("image-pipeline v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Storage: {:?}", config.storage);
    info!("  Max upload: {} bytes", config.max_upload_bytes);
    info!(
        "  Cache: {}MB of derivatives",
        config.cache_bytes / (1024 * 1024)
    );
    info!(
        "  Transcode: {} workers, max dimension {}, fallback {:?}, default quality {}",
        config.workers(),
        config.max_dimension,
        config.fallback_formats,
        config.default_quality
    );
    info!("  Signing key: {}", keys.active_key_id());
    if config.storage == StorageKind::Memory {
        warn!("  Memory storage: uploads are lost on restart");
    }

    let backend = match build_backend(&config).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cache = DerivativeCache::with_capacity(config.cache_bytes);
    let store = AssetStore::new(backend, config.max_upload_bytes)
        .with_listener(Arc::new(cache.clone()));

    let engine = ImageTranscoder::new(
        config.max_dimension,
        FallbackPolicy::new(config.fallback_formats.clone()),
    );
    let pool = TranscodePool::new(Arc::new(engine), config.workers());

    let policy = AccessPolicy::new(TokenService::new(keys));
    let pipeline = Pipeline::new(policy, Arc::new(store), cache, pool);

    let router = create_router(pipeline, build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on: http://{}", addr);

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "image_pipeline=debug,tower_http=debug"
    } else {
        "image_pipeline=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Active key plus retired keys (call validate() first).
fn signing_keys(config: &ServeConfig) -> Result<SigningKeys, String> {
    let secret = config.token_secret.as_deref().unwrap_or_default();
    let mut keys = SigningKeys::new(config.token_kid.clone(), secret).map_err(|e| e.to_string())?;
    for (kid, secret) in config.retired_key_pairs() {
        keys = keys
            .with_retired_key(kid, secret)
            .map_err(|e| e.to_string())?;
    }
    Ok(keys)
}

async fn build_backend(config: &ServeConfig) -> Result<Arc<dyn BlobBackend>, String> {
    match config.storage {
        StorageKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        StorageKind::Fs => {
            let root = config
                .storage_dir
                .clone()
                .ok_or_else(|| "missing storage directory".to_string())?;
            info!("  Storage directory: {}", root.display());
            let backend = FsBackend::new(root).await.map_err(|e| e.to_string())?;
            Ok(Arc::new(backend))
        }
        StorageKind::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| "missing S3 bucket".to_string())?;
            info!("  S3 bucket: {}", bucket);
            if let Some(ref endpoint) = config.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            info!("  S3 region: {}", config.s3_region);

            let client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
            Ok(Arc::new(S3Backend::new(
                client,
                bucket,
                config.s3_prefix.clone(),
            )))
        }
    }
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_default_quality(config.default_quality)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Token Command
// =============================================================================

fn run_token(config: TokenConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let keys = match SigningKeys::new(config.kid.clone(), &config.secret) {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let service = TokenService::new(keys);
    let scopes = config.effective_scopes();
    let issued = match service.issue(&config.subject, &scopes, Duration::from_secs(config.ttl)) {
        Ok(issued) => issued,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        let json = serde_json::json!({
            "token": issued.token,
            "kid": config.kid,
            "claims": issued.claims,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", issued.token);
    }

    ExitCode::SUCCESS
}
