//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        PUT /assets    GET /assets/{id}?w=&h=&fmt=&q=            │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    auth     │  │        routes           │  │
//! │  │ (requests)  │  │  (bearer)   │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              ▼
//!                          Pipeline
//! ```

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{bearer_token, BearerToken};
pub use handlers::{
    asset_handler, asset_meta_handler, assets_handler, delete_handler, health_handler,
    upload_handler, AppState, AssetsResponse, BatchQueryParams, ErrorResponse, HealthResponse,
    TransformQueryParams, X_DERIVATIVE_CACHE, X_DERIVATIVE_FORMAT,
};
pub use routes::{create_router, RouterConfig};
