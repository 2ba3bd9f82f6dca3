//! Configuration management for the image pipeline.
//!
//! Options come from command-line arguments or `IMG_`-prefixed environment
//! variables, with defaults for everything except the signing secret.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use image_pipeline::config::{Cli, Command};
//!
//! match Cli::parse().command {
//!     Command::Serve(config) => println!("binding {}", config.bind_address()),
//!     Command::Token(config) => println!("issuing for {}", config.subject),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `IMG_HOST` / `IMG_PORT` - Server bind address (default: 0.0.0.0:3000)
//! - `IMG_STORAGE` - Storage backend: memory, fs or s3 (default: memory)
//! - `IMG_STORAGE_DIR` - Root directory for the fs backend
//! - `IMG_S3_BUCKET` / `IMG_S3_PREFIX` / `IMG_S3_ENDPOINT` / `IMG_S3_REGION` - S3 backend
//! - `IMG_TOKEN_SECRET` - HMAC secret for bearer tokens (required, 32+ bytes)
//! - `IMG_TOKEN_KID` - Key id of the signing secret (default: "default")
//! - `IMG_RETIRED_KEYS` - Retired `kid=secret` pairs still accepted for verification
//! - `IMG_MAX_UPLOAD_BYTES` - Upload size limit (default: 10MB)
//! - `IMG_CACHE_BYTES` - Derivative cache capacity (default: 256MB)
//! - `IMG_MAX_DIMENSION` - Largest requested output width or height (default: 4096)
//! - `IMG_TRANSCODE_WORKERS` - Concurrent transcodes (default: CPU count)
//! - `IMG_FALLBACK_FORMATS` - Fallback encode order (default: webp,png,jpeg)
//! - `IMG_DEFAULT_QUALITY` - Output quality when a request has no `q` (default: 80)
//! - `IMG_CORS_ORIGINS` - Allowed CORS origins, comma-separated
//! - `IMG_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::auth::{Role, Scope, DEFAULT_KEY_ID, DEFAULT_TOKEN_TTL_SECS, MIN_KEY_LEN};
use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::store::DEFAULT_MAX_UPLOAD_BYTES;
use crate::transcode::{is_valid_quality, ImageKind, DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Upper bound on the transcode worker count.
pub const MAX_TRANSCODE_WORKERS: usize = 256;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Image pipeline - authenticated upload, resize and transcode server.
#[derive(Parser, Debug, Clone)]
#[command(name = "image-pipeline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(ServeConfig),

    /// Issue a bearer token signed with the server secret.
    Token(TokenConfig),
}

/// Where uploaded originals are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// Process memory; lost on restart
    Memory,
    /// Local directory
    Fs,
    /// S3 or an S3-compatible object store
    S3,
}

/// Options for `serve`.
#[derive(Parser, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMG_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "IMG_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Storage backend for uploaded originals.
    #[arg(long, value_enum, default_value_t = StorageKind::Memory, env = "IMG_STORAGE")]
    pub storage: StorageKind,

    /// Root directory for the fs backend.
    #[arg(long, env = "IMG_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// S3 bucket name for the s3 backend.
    #[arg(long, env = "IMG_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix inside the bucket.
    #[arg(long, env = "IMG_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "IMG_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "IMG_S3_REGION")]
    pub s3_region: String,

    /// Maximum accepted upload size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "IMG_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: usize,

    // =========================================================================
    // Token Configuration
    // =========================================================================
    /// HMAC-SHA256 secret used to sign and verify bearer tokens.
    #[arg(long, env = "IMG_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: Option<String>,

    /// Key id of the active signing secret.
    #[arg(long, default_value = DEFAULT_KEY_ID, env = "IMG_TOKEN_KID")]
    pub token_kid: String,

    /// Retired keys still accepted for verification, as `kid=secret`.
    #[arg(
        long,
        env = "IMG_RETIRED_KEYS",
        value_delimiter = ',',
        hide_env_values = true
    )]
    pub retired_keys: Vec<String>,

    // =========================================================================
    // Cache & Transcode Configuration
    // =========================================================================
    /// Derivative cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY, env = "IMG_CACHE_BYTES")]
    pub cache_bytes: usize,

    /// Largest output width or height a request may ask for.
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION, env = "IMG_MAX_DIMENSION")]
    pub max_dimension: u32,

    /// Concurrent transcodes (defaults to the number of CPUs).
    #[arg(long, env = "IMG_TRANSCODE_WORKERS")]
    pub transcode_workers: Option<usize>,

    /// Formats tried, in order, when the requested one cannot be produced.
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [ImageKind::WebP, ImageKind::Png, ImageKind::Jpeg],
        env = "IMG_FALLBACK_FORMATS"
    )]
    pub fallback_formats: Vec<ImageKind>,

    /// Output quality (1-100) used when a request does not pass `q`.
    #[arg(long, default_value_t = DEFAULT_QUALITY, env = "IMG_DEFAULT_QUALITY")]
    pub default_quality: u8,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "IMG_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "IMG_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        validate_secret(self.token_secret.as_deref(), "--token-secret or IMG_TOKEN_SECRET")?;

        if self.token_kid.trim().is_empty() {
            return Err("token_kid must not be empty".to_string());
        }
        for pair in &self.retired_keys {
            let (kid, secret) = parse_key_pair(pair)?;
            if kid == self.token_kid {
                return Err(format!("retired key '{}' collides with the active key id", kid));
            }
            validate_secret(Some(secret), "every retired key")?;
        }

        match self.storage {
            StorageKind::Memory => {}
            StorageKind::Fs => {
                if self.storage_dir.is_none() {
                    return Err(
                        "The fs backend needs a directory. Set --storage-dir or IMG_STORAGE_DIR"
                            .to_string(),
                    );
                }
            }
            StorageKind::S3 => {
                if self.s3_bucket.as_deref().map_or(true, str::is_empty) {
                    return Err(
                        "S3 bucket name is required. Set --s3-bucket or IMG_S3_BUCKET".to_string(),
                    );
                }
            }
        }

        if self.max_upload_bytes == 0 {
            return Err("max_upload_bytes must be greater than 0".to_string());
        }
        if self.cache_bytes == 0 {
            return Err("cache_bytes must be greater than 0".to_string());
        }
        if self.max_dimension == 0 {
            return Err("max_dimension must be greater than 0".to_string());
        }
        if let Some(workers) = self.transcode_workers {
            if workers == 0 || workers > MAX_TRANSCODE_WORKERS {
                return Err(format!(
                    "transcode_workers must be between 1 and {}",
                    MAX_TRANSCODE_WORKERS
                ));
            }
        }
        if self.fallback_formats.is_empty() {
            return Err("fallback_formats must name at least one format".to_string());
        }
        if !is_valid_quality(self.default_quality) {
            return Err("default_quality must be between 1 and 100".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Transcode worker count, falling back to available parallelism.
    pub fn workers(&self) -> usize {
        self.transcode_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Retired keys as `(kid, secret)` pairs (call validate() first).
    pub fn retired_key_pairs(&self) -> Vec<(&str, &str)> {
        self.retired_keys
            .iter()
            .filter_map(|pair| parse_key_pair(pair).ok())
            .collect()
    }
}

/// Options for `token`.
#[derive(Parser, Debug, Clone)]
pub struct TokenConfig {
    /// Subject (owner name) the token is issued to.
    pub subject: String,

    /// Role preset expanded into scopes.
    #[arg(long, value_enum, default_value_t = Role::Manager)]
    pub role: Role,

    /// Explicit scopes (read, write, delete, read:*, read:<owner>); replaces --role.
    #[arg(long, value_delimiter = ',')]
    pub scopes: Vec<Scope>,

    /// Token lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECS)]
    pub ttl: u64,

    /// HMAC-SHA256 signing secret.
    #[arg(long, env = "IMG_TOKEN_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Key id written into the token header.
    #[arg(long, default_value = DEFAULT_KEY_ID, env = "IMG_TOKEN_KID")]
    pub kid: String,

    /// Print the full claims as JSON instead of the bare token.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl TokenConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.subject.trim().is_empty() {
            return Err("subject must not be empty".to_string());
        }
        if self.ttl == 0 {
            return Err("ttl must be greater than 0".to_string());
        }
        validate_secret(Some(&self.secret), "--secret or IMG_TOKEN_SECRET")
    }

    /// Scopes to embed: explicit ones if given, otherwise the role's.
    pub fn effective_scopes(&self) -> Vec<Scope> {
        if self.scopes.is_empty() {
            self.role.scopes()
        } else {
            self.scopes.clone()
        }
    }
}

fn validate_secret(secret: Option<&str>, hint: &str) -> Result<(), String> {
    match secret {
        None => Err(format!("A token secret is required. Set {}", hint)),
        Some(secret) if secret.len() < MIN_KEY_LEN => Err(format!(
            "Token secrets must be at least {} bytes; check {}",
            MIN_KEY_LEN, hint
        )),
        Some(_) => Ok(()),
    }
}

fn parse_key_pair(pair: &str) -> Result<(&str, &str), String> {
    match pair.split_once('=') {
        Some((kid, secret)) if !kid.is_empty() => Ok((kid, secret)),
        _ => Err(format!("retired key '{}' is not in kid=secret form", pair)),
    }
}

// =============================================================================
// Tests
// =============================================================================
