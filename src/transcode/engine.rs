//! Image transcode engine.
//!
//! Decodes a source image, resizes it per a [`TransformSpec`], and encodes it
//! to the requested format.
//!
//! # Design Decisions
//!
//! - **Pure**: no I/O, no shared state. The same input always yields the same
//!   bytes for a given [`ENGINE_VERSION`], which is what makes derivatives
//!   safe to cache.
//!
//! - **Format fallback**: JPEG cannot carry transparency. When the resized
//!   raster has non-opaque pixels and the requested format cannot hold them,
//!   or when encoding fails, the engine walks the configured
//!   [`FallbackPolicy`] and reports the format it actually produced.
//!
//! - **Lossy WebP**: the `image` crate only encodes lossless WebP, so WebP
//!   output goes through libwebp (`webp` crate) at the requested quality.
//!   `image` still decodes WebP sources.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Limits};

use super::spec::{clamp_quality, ImageKind, TransformSpec};
use crate::error::TranscodeError;

/// Bumped whenever output bytes for the same input can change.
pub const ENGINE_VERSION: u32 = 2;

/// Default maximum requested output dimension.
pub const DEFAULT_MAX_DIMENSION: u32 = 4096;

/// Default maximum source dimension accepted by the decoder.
pub const DEFAULT_MAX_SOURCE_DIMENSION: u32 = 16_384;

/// Decoder allocation ceiling (512MB).
const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

// =============================================================================
// Fallback Policy
// =============================================================================

/// Ordered list of formats tried when the requested one cannot be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    order: Vec<ImageKind>,
}

impl FallbackPolicy {
    pub fn new(order: Vec<ImageKind>) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &[ImageKind] {
        &self.order
    }

    /// Candidate formats: the requested one first, then the fallbacks.
    ///
    /// Formats that cannot hold transparency are skipped when it is needed.
    fn candidates(&self, requested: ImageKind, needs_alpha: bool) -> Vec<ImageKind> {
        let mut out = Vec::with_capacity(self.order.len() + 1);
        for kind in std::iter::once(requested).chain(self.order.iter().copied()) {
            if needs_alpha && !kind.supports_alpha() {
                continue;
            }
            if !out.contains(&kind) {
                out.push(kind);
            }
        }
        out
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new(vec![ImageKind::WebP, ImageKind::Png, ImageKind::Jpeg])
    }
}

// =============================================================================
// Transcoder
// =============================================================================

/// Output of a successful transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedImage {
    pub data: Bytes,
    /// Format actually produced (may differ from the requested one)
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
}

/// Stateless image transformation.
///
/// Implementations must be deterministic: the derivative cache relies on it.
pub trait Transcoder: Send + Sync + 'static {
    /// Reject specs this engine will never satisfy, before any work is done.
    fn validate(&self, spec: &TransformSpec) -> Result<(), TranscodeError>;

    /// Produce a derivative from source bytes.
    fn transcode(
        &self,
        source: &[u8],
        source_mime: &str,
        spec: &TransformSpec,
    ) -> Result<TranscodedImage, TranscodeError>;
}

/// Transcoder backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageTranscoder {
    max_dimension: u32,
    max_source_dimension: u32,
    fallback: FallbackPolicy,
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION, FallbackPolicy::default())
    }
}

impl ImageTranscoder {
    pub fn new(max_dimension: u32, fallback: FallbackPolicy) -> Self {
        Self {
            max_dimension,
            max_source_dimension: DEFAULT_MAX_SOURCE_DIMENSION,
            fallback,
        }
    }

    pub fn with_max_source_dimension(mut self, max_source_dimension: u32) -> Self {
        self.max_source_dimension = max_source_dimension;
        self
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    pub fn fallback(&self) -> &FallbackPolicy {
        &self.fallback
    }

    /// Get image dimensions without fully decoding.
    pub fn dimensions(&self, source: &[u8]) -> Result<(u32, u32), TranscodeError> {
        ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| TranscodeError::DecodeError(e.to_string()))?
            .into_dimensions()
            .map_err(|e| TranscodeError::DecodeError(e.to_string()))
    }

    fn decode(&self, source: &[u8], source_mime: &str) -> Result<(DynamicImage, ImageKind), TranscodeError> {
        let mut reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| TranscodeError::DecodeError(e.to_string()))?;

        if reader.format().is_none() {
            if let Some(kind) = ImageKind::from_mime_type(source_mime) {
                reader.set_format(to_image_format(kind));
            }
        }

        let kind = reader
            .format()
            .and_then(ImageKind::from_image_format)
            .ok_or_else(|| TranscodeError::DecodeError("unrecognized image format".to_string()))?;

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_source_dimension);
        limits.max_image_height = Some(self.max_source_dimension);
        limits.max_alloc = Some(MAX_DECODE_ALLOC);
        reader.limits(limits);

        let img = reader
            .decode()
            .map_err(|e| TranscodeError::DecodeError(e.to_string()))?;

        Ok((img, kind))
    }
}

impl Transcoder for ImageTranscoder {
    fn validate(&self, spec: &TransformSpec) -> Result<(), TranscodeError> {
        spec.validate(self.max_dimension)
    }

    fn transcode(
        &self,
        source: &[u8],
        source_mime: &str,
        spec: &TransformSpec,
    ) -> Result<TranscodedImage, TranscodeError> {
        self.validate(spec)?;

        let (img, source_kind) = self.decode(source, source_mime)?;

        let (width, height) = spec.target_dimensions(img.width(), img.height());
        let img = if (width, height) == (img.width(), img.height()) {
            img
        } else {
            img.resize_exact(width, height, FilterType::Lanczos3)
        };

        let requested = spec.format.resolve(source_kind);
        let needs_alpha = has_transparency(&img);
        let quality = clamp_quality(spec.quality);

        let mut last_error = None;
        for kind in self.fallback.candidates(requested, needs_alpha) {
            match encode(&img, kind, quality) {
                Ok(data) => {
                    if kind != requested {
                        tracing::debug!(
                            requested = %requested,
                            produced = %kind,
                            needs_alpha,
                            "Fell back to alternate output format"
                        );
                    }
                    return Ok(TranscodedImage {
                        data: Bytes::from(data),
                        kind,
                        width,
                        height,
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TranscodeError::EncodeError(format!("no fallback format can encode {}", requested))
        }))
    }
}

fn to_image_format(kind: ImageKind) -> image::ImageFormat {
    match kind {
        ImageKind::Jpeg => image::ImageFormat::Jpeg,
        ImageKind::Png => image::ImageFormat::Png,
        ImageKind::WebP => image::ImageFormat::WebP,
    }
}

/// True if the image has an alpha channel with at least one non-opaque pixel.
fn has_transparency(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    img.to_rgba8().pixels().any(|p| p.0[3] < u8::MAX)
}

fn encode(img: &DynamicImage, kind: ImageKind, quality: u8) -> Result<Vec<u8>, TranscodeError> {
    let mut output = Vec::new();
    let keep_alpha = img.color().has_alpha() && kind.supports_alpha();

    let normalized = if keep_alpha {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };

    let result = match kind {
        ImageKind::Jpeg => {
            normalized.write_with_encoder(JpegEncoder::new_with_quality(&mut output, quality))
        }
        ImageKind::Png => normalized.write_with_encoder(PngEncoder::new(&mut output)),
        ImageKind::WebP => return encode_webp(&normalized, quality),
    };

    result.map_err(|e| TranscodeError::EncodeError(format!("{}: {}", kind, e)))?;
    Ok(output)
}

/// Lossy WebP at `quality` (1-100). Expects an RGB8 or RGBA8 raster.
fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, TranscodeError> {
    let encoder = webp::Encoder::from_image(img)
        .map_err(|e| TranscodeError::EncodeError(format!("webp: {}", e)))?;
    let memory = encoder
        .encode_simple(false, f32::from(quality))
        .map_err(|e| TranscodeError::EncodeError(format!("webp: {:?}", e)))?;
    Ok(memory.to_vec())
}

// =============================================================================
// Tests
// =============================================================================
