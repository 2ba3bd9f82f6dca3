//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                  - Health check (public)
//! /assets                  - PUT upload, GET batch metadata (?ids=a,b)
//! /assets/{id}             - GET original or derivative, DELETE
//! /assets/{id}/meta        - GET metadata
//! ```
//!
//! Every `/assets` route authenticates through the pipeline's access
//! policy, so there is no separate auth middleware.
//!
//! # Example
//!
//! ```ignore
//! use image_pipeline::server::{create_router, RouterConfig};
//!
//! let router = create_router(pipeline, RouterConfig::new());
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    asset_handler, asset_meta_handler, assets_handler, delete_handler, health_handler,
    upload_handler, AppState, X_DERIVATIVE_CACHE, X_DERIVATIVE_FORMAT,
};
use crate::pipeline::Pipeline;
use crate::transcode::DEFAULT_QUALITY;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Output quality for transforms that do not pass `q`
    pub default_quality: u8,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Defaults: any CORS origin, 1 hour max-age, tracing on.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            default_quality: DEFAULT_QUALITY,
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

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_default_quality(mut self, quality: u8) -> Self {
        self.default_quality = quality;
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

/// Create the application router.
pub fn create_router(pipeline: Pipeline, config: RouterConfig) -> Router {
    // Let bodies just over the limit through so the store reports them
    let body_limit = pipeline.store().max_size().saturating_add(1);
    let state = AppState::with_cache_max_age(pipeline, config.cache_max_age)
        .with_default_quality(config.default_quality);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/assets", get(assets_handler).put(upload_handler))
        .route("/assets/{id}", get(asset_handler).delete(delete_handler))
        .route("/assets/{id}/meta", get(asset_meta_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(build_cors_layer(&config));

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
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([X_DERIVATIVE_CACHE, X_DERIVATIVE_FORMAT])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
