//! Test utilities for integration tests.
//!
//! Provides image fixtures, token helpers, a call-counting transcoder and a
//! harness wiring every pipeline component to an in-memory backend.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};

use image_pipeline::auth::{AccessPolicy, Role, Scope, SigningKeys, TokenService};
use image_pipeline::cache::DerivativeCache;
use image_pipeline::error::TranscodeError;
use image_pipeline::pipeline::Pipeline;
use image_pipeline::server::{create_router, RouterConfig};
use image_pipeline::store::{AssetStore, MemoryBackend, DEFAULT_MAX_UPLOAD_BYTES};
use image_pipeline::transcode::{
    ImageTranscoder, TranscodePool, TranscodedImage, Transcoder, TransformSpec,
};

pub const SECRET: &str = "0123456789abcdef0123456789abcdef";
pub const KID: &str = "k1";

// =============================================================================
// Image Fixtures
// =============================================================================

/// Encode a gradient JPEG of the given size.
pub fn create_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 85)
        .encode_image(&img)
        .unwrap();
    out
}

/// Encode a PNG whose left half is fully transparent.
pub fn create_transparent_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([200, 40, 40, 255])
        }
    });

    let mut out = Cursor::new(Vec::new());
    PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .unwrap();
    out.into_inner()
}

pub fn is_webp(data: &[u8]) -> bool {
    data.len() > 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP"
}

pub fn is_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G'])
}

pub fn decoded_dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).unwrap();
    (img.width(), img.height())
}

// =============================================================================
// Tokens
// =============================================================================

pub fn token_service() -> TokenService {
    TokenService::new(SigningKeys::new(KID, SECRET).unwrap())
}

pub fn token_with_scopes(subject: &str, scopes: &[Scope]) -> String {
    token_service()
        .issue(subject, scopes, Duration::from_secs(600))
        .unwrap()
        .token
}

pub fn token_for(subject: &str, role: Role) -> String {
    token_with_scopes(subject, &role.scopes())
}

/// A correctly signed token that expired an hour ago.
pub fn expired_token(subject: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    token_service()
        .issue_at(subject, &[Scope::Read], Duration::from_secs(60), now - 3600)
        .unwrap()
        .token
}

// =============================================================================
// Counting Transcoder
// =============================================================================

/// Wraps the real engine and counts transcode calls, optionally sleeping
/// inside each call to widen race windows.
pub struct CountingTranscoder {
    inner: ImageTranscoder,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingTranscoder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: ImageTranscoder::default(),
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcoder for CountingTranscoder {
    fn validate(&self, spec: &TransformSpec) -> Result<(), TranscodeError> {
        self.inner.validate(spec)
    }

    fn transcode(
        &self,
        source: &[u8],
        source_mime: &str,
        spec: &TransformSpec,
    ) -> Result<TranscodedImage, TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.transcode(source, source_mime, spec)
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Every pipeline component, with handles kept for assertions.
pub struct TestHarness {
    pub pipeline: Pipeline,
    pub backend: Arc<MemoryBackend>,
    pub cache: DerivativeCache,
    pub engine: Arc<CountingTranscoder>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(DEFAULT_MAX_UPLOAD_BYTES, Duration::ZERO)
    }

    pub fn with_max_upload(max_upload: usize) -> Self {
        Self::build(max_upload, Duration::ZERO)
    }

    pub fn with_transcode_delay(delay: Duration) -> Self {
        Self::build(DEFAULT_MAX_UPLOAD_BYTES, delay)
    }

    fn build(max_upload: usize, delay: Duration) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let cache = DerivativeCache::with_capacity(64 * 1024 * 1024);
        let store = AssetStore::new(backend.clone(), max_upload)
            .with_listener(Arc::new(cache.clone()));
        let engine = Arc::new(CountingTranscoder::new(delay));
        let pool = TranscodePool::new(engine.clone(), 4);
        let pipeline = Pipeline::new(
            AccessPolicy::new(token_service()),
            Arc::new(store),
            cache.clone(),
            pool,
        );

        Self {
            pipeline,
            backend,
            cache,
            engine,
        }
    }

    pub fn router(&self) -> Router {
        self.router_with(RouterConfig::new())
    }

    /// Router over the shared pipeline with custom settings (tracing off).
    pub fn router_with(&self, config: RouterConfig) -> Router {
        create_router(self.pipeline.clone(), config.with_tracing(false))
    }

    /// Upload directly through the pipeline and return the asset id.
    pub async fn upload(&self, owner: &str, data: Vec<u8>, mime: &str) -> String {
        let token = token_for(owner, Role::Manager);
        self.pipeline
            .upload(Some(&token), Bytes::from(data), mime)
            .await
            .unwrap()
            .id
            .to_string()
    }
}

// =============================================================================
// HTTP Helpers
// =============================================================================

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn put_request(data: Vec<u8>, mime: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("PUT")
        .uri("/assets")
        .header(header::CONTENT_TYPE, mime);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(data)).unwrap()
}

pub fn delete_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("DELETE").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// CORS preflight for `uri` from `origin`.
pub fn preflight_request(uri: &str, origin: &str) -> Request<Body> {
    Request::builder()
        .method("OPTIONS")
        .uri(uri)
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = body_bytes(response).await;
    serde_json::from_slice(&body).unwrap()
}
