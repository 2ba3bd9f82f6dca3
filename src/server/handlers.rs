//! HTTP request handlers for the asset API.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check with cache statistics
//! - `PUT /assets` - Upload an original image
//! - `GET /assets?ids=a,b` - Batch metadata
//! - `GET /assets/{id}` - Original or derivative bytes
//! - `GET /assets/{id}/meta` - Asset metadata
//! - `DELETE /assets/{id}` - Delete an asset and its derivatives

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::auth::BearerToken;
use crate::cache::CacheStats;
use crate::error::{PipelineError, PolicyDenial, ResponseCode, StorageError};
use crate::pipeline::Pipeline;
use crate::store::AssetInfo;
use crate::transcode::{Fit, OutputFormat, TransformSpec, DEFAULT_QUALITY};

/// Cache outcome of a derivative response: `hit`, `miss` or `joined`.
pub const X_DERIVATIVE_CACHE: HeaderName = HeaderName::from_static("x-derivative-cache");

/// Format actually produced for a derivative response.
pub const X_DERIVATIVE_FORMAT: HeaderName = HeaderName::from_static("x-derivative-format");

// =============================================================================
// Application State
// =============================================================================

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,

    /// Cache-Control max-age for image responses, in seconds
    pub cache_max_age: u32,

    /// Quality applied when a transform request has no `q`
    pub default_quality: u8,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self::with_cache_max_age(pipeline, 3600)
    }

    pub fn with_cache_max_age(pipeline: Pipeline, cache_max_age: u32) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            cache_max_age,
            default_quality: DEFAULT_QUALITY,
        }
    }

    pub fn with_default_quality(mut self, quality: u8) -> Self {
        self.default_quality = quality;
        self
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Transform query parameters for `GET /assets/{id}`.
///
/// Values are taken as strings and parsed here so malformed input gets the
/// same JSON error body as every other failure.
#[derive(Debug, Default, Deserialize)]
pub struct TransformQueryParams {
    /// Target width
    pub w: Option<String>,

    /// Target height
    pub h: Option<String>,

    /// Output format: original, jpeg, png, webp
    pub fmt: Option<String>,

    /// Quality 1-100
    pub q: Option<String>,

    /// Fit mode: contain or exact
    pub fit: Option<String>,
}

impl TransformQueryParams {
    /// `None` when no transform parameter is present. A missing `q` takes
    /// `default_quality`.
    pub fn to_spec(&self, default_quality: u8) -> Result<Option<TransformSpec>, PipelineError> {
        if self.w.is_none()
            && self.h.is_none()
            && self.fmt.is_none()
            && self.q.is_none()
            && self.fit.is_none()
        {
            return Ok(None);
        }

        let mut spec = TransformSpec::new().with_quality(default_quality);
        if let Some(w) = &self.w {
            spec.width = Some(parse_number("w", w)?);
        }
        if let Some(h) = &self.h {
            spec.height = Some(parse_number("h", h)?);
        }
        if let Some(q) = &self.q {
            spec.quality = parse_number("q", q)?;
        }
        if let Some(fmt) = &self.fmt {
            spec.format = fmt
                .parse::<OutputFormat>()
                .map_err(PipelineError::InvalidRequest)?;
        }
        if let Some(fit) = &self.fit {
            spec.fit = fit.parse::<Fit>().map_err(PipelineError::InvalidRequest)?;
        }
        Ok(Some(spec))
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, PipelineError> {
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::InvalidRequest(format!("invalid {} value '{}'", name, raw)))
}

/// Query parameters for batch metadata.
#[derive(Debug, Deserialize)]
pub struct BatchQueryParams {
    /// Comma-separated asset ids
    pub ids: Option<String>,
}

impl BatchQueryParams {
    pub fn ids(&self) -> Vec<String> {
        self.ids
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "not_owner")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage: String,
    pub cache: CacheStats,
}

/// Batch metadata response.
#[derive(Debug, Serialize)]
pub struct AssetsResponse {
    pub assets: Vec<AssetInfo>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Status code and error type for a pipeline error.
fn classify(err: &PipelineError) -> (StatusCode, &'static str) {
    match err {
        PipelineError::Denied(denial) => match denial {
            PolicyDenial::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            PolicyDenial::Expired => (StatusCode::UNAUTHORIZED, "token_expired"),
            PolicyDenial::ScopeInsufficient(_) => (StatusCode::FORBIDDEN, "scope_insufficient"),
            PolicyDenial::NotOwner => (StatusCode::FORBIDDEN, "not_owner"),
        },
        PipelineError::Storage(StorageError::NotOwner(_)) => (StatusCode::FORBIDDEN, "not_owner"),
        PipelineError::Storage(StorageError::EmptyPayload) => {
            (StatusCode::BAD_REQUEST, "empty_payload")
        }
        other => {
            let code = other.code();
            let status = match code {
                ResponseCode::Ok => StatusCode::OK,
                ResponseCode::Denied => StatusCode::FORBIDDEN,
                ResponseCode::NotFound => StatusCode::NOT_FOUND,
                ResponseCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                ResponseCode::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ResponseCode::DecodeError => StatusCode::UNPROCESSABLE_ENTITY,
                ResponseCode::UnsupportedTransform | ResponseCode::InvalidRequest => {
                    StatusCode::BAD_REQUEST
                }
                ResponseCode::InternalFailure => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, code.as_str())
        }
    }
}

/// Convert PipelineError to an HTTP response.
///
/// - 5xx errors are logged at ERROR level
/// - 404s at DEBUG level (common and expected)
/// - other 4xx at WARN level
impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self);
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let mut response =
            (status, Json(ErrorResponse::with_status(error_type, message, status))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.pipeline.store().backend_name().to_string(),
        cache: state.pipeline.cache_stats().await,
    })
}

/// Handle uploads.
///
/// # Endpoint
///
/// `PUT /assets` with the raw image as body and its MIME type as
/// `Content-Type`.
///
/// # Response
///
/// - `201 Created`: JSON asset metadata, `Location: /assets/{id}`
/// - `401`/`403`: Missing, invalid or insufficient token
/// - `413 Payload Too Large`: Body over the configured limit
/// - `415 Unsupported Media Type`: Not a JPEG, PNG or WebP image
pub async fn upload_handler(
    State(state): State<AppState>,
    token: BearerToken,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, PipelineError> {
    let max = state.pipeline.store().max_size();
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            let size = headers
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(max.saturating_add(1));
            PipelineError::Storage(StorageError::PayloadTooLarge { size, max })
        } else {
            PipelineError::InvalidRequest(rejection.body_text())
        }
    })?;

    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let info = state
        .pipeline
        .upload(token.as_deref(), body, mime_type)
        .await?;

    let location = HeaderValue::from_str(&format!("/assets/{}", info.id))
        .map_err(|e| PipelineError::Internal(e.to_string()))?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(info),
    )
        .into_response())
}

/// Handle image requests.
///
/// # Endpoint
///
/// `GET /assets/{id}`
///
/// # Query Parameters
///
/// - `w`, `h`: Bounding box in pixels
/// - `fmt`: `original`, `jpeg`, `png` or `webp`
/// - `q`: Quality 1-100 (JPEG)
/// - `fit`: `contain` (default) or `exact`
///
/// Without any of these the original is returned.
///
/// # Headers
///
/// - `Content-Type`: Format actually produced
/// - `Cache-Control: private, max-age={cache_max_age}`
/// - `X-Derivative-Cache: hit|miss|joined` (derivatives only)
/// - `X-Derivative-Format`: Format actually produced (derivatives only)
pub async fn asset_handler(
    State(state): State<AppState>,
    token: BearerToken,
    Path(asset_id): Path<String>,
    Query(query): Query<TransformQueryParams>,
) -> Result<Response, PipelineError> {
    let spec = query.to_spec(state.default_quality)?;
    let fetched = state
        .pipeline
        .fetch(token.as_deref(), &asset_id, spec)
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(fetched.kind.mime_type()),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_str(&format!("private, max-age={}", state.cache_max_age))
            .map_err(|e| PipelineError::Internal(e.to_string()))?,
    );
    if let Some(status) = fetched.cache {
        headers.insert(X_DERIVATIVE_CACHE, HeaderValue::from_static(status.as_str()));
        headers.insert(
            X_DERIVATIVE_FORMAT,
            HeaderValue::from_static(fetched.kind.mime_type()),
        );
    }

    Ok((StatusCode::OK, headers, Body::from(fetched.data)).into_response())
}

/// Handle metadata requests.
///
/// # Endpoint
///
/// `GET /assets/{id}/meta`
pub async fn asset_meta_handler(
    State(state): State<AppState>,
    token: BearerToken,
    Path(asset_id): Path<String>,
) -> Result<Json<AssetInfo>, PipelineError> {
    let info = state
        .pipeline
        .describe(token.as_deref(), &asset_id)
        .await?;
    Ok(Json(info))
}

/// Handle batch metadata requests.
///
/// # Endpoint
///
/// `GET /assets?ids=a,b,c`
///
/// All ids must exist; otherwise `404` names every missing one.
pub async fn assets_handler(
    State(state): State<AppState>,
    token: BearerToken,
    Query(query): Query<BatchQueryParams>,
) -> Result<Json<AssetsResponse>, PipelineError> {
    let assets = state
        .pipeline
        .describe_many(token.as_deref(), &query.ids())
        .await?;
    Ok(Json(AssetsResponse { assets }))
}

/// Handle deletions.
///
/// # Endpoint
///
/// `DELETE /assets/{id}`
///
/// Returns `204 No Content`. Only the owner may delete.
pub async fn delete_handler(
    State(state): State<AppState>,
    token: BearerToken,
    Path(asset_id): Path<String>,
) -> Result<StatusCode, PipelineError> {
    state
        .pipeline
        .delete(token.as_deref(), &asset_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Tests
// =============================================================================
