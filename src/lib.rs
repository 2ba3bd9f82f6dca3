//! # Image Pipeline
//!
//! An authenticated image server: clients upload originals and fetch
//! resized or transcoded derivatives, generated on demand and cached.
//!
//! ## Features
//!
//! - **Signed bearer tokens**: HMAC-SHA256 with key rotation and scoped access
//! - **Content-addressed storage**: memory, local filesystem or S3 backends
//! - **Derivative cache**: byte-bounded LRU with single-flight generation
//! - **Bounded transcoding**: JPEG, PNG and WebP on the blocking thread pool
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`auth`] - Token service and access policy
//! - [`store`] - Asset store and blob backends
//! - [`transcode`] - Transform specs, transcode engine and worker pool
//! - [`cache`] - Derivative cache and eviction policies
//! - [`pipeline`] - Request orchestration and stage tracing
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use image_pipeline::{
//!     create_router, AccessPolicy, AssetStore, DerivativeCache, ImageTranscoder,
//!     MemoryBackend, Pipeline, RouterConfig, SigningKeys, TokenService, TranscodePool,
//!     DEFAULT_MAX_UPLOAD_BYTES,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let keys = SigningKeys::new("k1", "0123456789abcdef0123456789abcdef").unwrap();
//!     let cache = DerivativeCache::new();
//!     let store = AssetStore::new(Arc::new(MemoryBackend::new()), DEFAULT_MAX_UPLOAD_BYTES)
//!         .with_listener(Arc::new(cache.clone()));
//!     let pool = TranscodePool::new(Arc::new(ImageTranscoder::default()), 4);
//!     let pipeline = Pipeline::new(
//!         AccessPolicy::new(TokenService::new(keys)),
//!         Arc::new(store),
//!         cache,
//!         pool,
//!     );
//!
//!     let router = create_router(pipeline, RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod transcode;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types
pub use auth::{AccessPolicy, Claims, IssuedToken, Principal, Role, Scope, SigningKeys, TokenService};
pub use cache::{CacheStats, CacheStatus, Derivative, DerivativeCache, DerivativeKey};
pub use config::{Cli, Command, ServeConfig, StorageKind, TokenConfig};
pub use error::{
    AuthError, PipelineError, PolicyDenial, ResponseCode, SigningError, StorageError,
    TranscodeError,
};
pub use pipeline::{Pipeline, PipelineRequest, PipelineResponse, Stage, StageTrace};
pub use server::{create_router, AppState, RouterConfig};
pub use store::{
    Asset, AssetId, AssetInfo, AssetStore, BlobBackend, FsBackend, MemoryBackend, S3Backend,
    DEFAULT_MAX_UPLOAD_BYTES,
};
pub use transcode::{
    FallbackPolicy, ImageKind, ImageTranscoder, OutputFormat, TranscodePool, Transcoder,
    TransformSpec,
};

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
