//! Transform parameters and image formats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;

/// Default output quality (1-100).
pub const DEFAULT_QUALITY: u8 = 80;

/// Minimum allowed quality.
pub const MIN_QUALITY: u8 = 1;

/// Maximum allowed quality.
pub const MAX_QUALITY: u8 = 100;

// =============================================================================
// Formats
// =============================================================================

/// A concrete encoded image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    #[value(name = "webp")]
    #[serde(rename = "webp")]
    WebP,
}

impl ImageKind {
    /// MIME types accepted for upload.
    pub const ACCEPTED_MIME_TYPES: [&'static str; 3] = ["image/jpeg", "image/png", "image/webp"];

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::WebP => "image/webp",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            "image/webp" => Some(ImageKind::WebP),
            _ => None,
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            image::ImageFormat::Png => Some(ImageKind::Png),
            image::ImageFormat::WebP => Some(ImageKind::WebP),
            _ => None,
        }
    }

    /// Sniff the format from magic bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        image::guess_format(data)
            .ok()
            .and_then(Self::from_image_format)
    }

    /// Whether the encoder for this format keeps an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, ImageKind::Jpeg)
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Jpeg => write!(f, "jpeg"),
            ImageKind::Png => write!(f, "png"),
            ImageKind::WebP => write!(f, "webp"),
        }
    }
}

/// Requested output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Keep the source format
    #[default]
    Original,
    Jpeg,
    Png,
    #[serde(rename = "webp")]
    WebP,
}

impl OutputFormat {
    /// The concrete format to aim for given the source format.
    pub fn resolve(&self, source: ImageKind) -> ImageKind {
        match self {
            OutputFormat::Original => source,
            OutputFormat::Jpeg => ImageKind::Jpeg,
            OutputFormat::Png => ImageKind::Png,
            OutputFormat::WebP => ImageKind::WebP,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" | "orig" => Ok(OutputFormat::Original),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::WebP),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Original => write!(f, "original"),
            OutputFormat::Jpeg => write!(f, "jpeg"),
            OutputFormat::Png => write!(f, "png"),
            OutputFormat::WebP => write!(f, "webp"),
        }
    }
}

/// How the target box is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Scale down to fit inside the box, preserving aspect ratio
    #[default]
    Contain,
    /// Stretch to exactly the box (requires width and height)
    Exact,
}

impl FromStr for Fit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "contain" => Ok(Fit::Contain),
            "exact" | "fill" => Ok(Fit::Exact),
            other => Err(format!("unknown fit mode '{}'", other)),
        }
    }
}

// =============================================================================
// Transform Spec
// =============================================================================

/// Parameters defining a derivative. Compared and hashed by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub format: OutputFormat,
    pub quality: u8,
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            fit: Fit::Contain,
            format: OutputFormat::Original,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl TransformSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounding box shorthand.
    pub fn bounded(width: u32, height: u32) -> Self {
        Self::default().with_width(width).with_height(height)
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_fit(mut self, fit: Fit) -> Self {
        self.fit = fit;
        self
    }

    /// True when the spec asks for the source unchanged.
    pub fn is_identity(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.format == OutputFormat::Original
    }

    /// Reject dimensions and qualities the engine will not produce.
    pub fn validate(&self, max_dimension: u32) -> Result<(), TranscodeError> {
        for (axis, value) in [("width", self.width), ("height", self.height)] {
            match value {
                Some(0) => {
                    return Err(TranscodeError::UnsupportedTransform(format!(
                        "{} must be positive",
                        axis
                    )))
                }
                Some(v) if v > max_dimension => {
                    return Err(TranscodeError::UnsupportedTransform(format!(
                        "{} {} exceeds the maximum of {}",
                        axis, v, max_dimension
                    )))
                }
                _ => {}
            }
        }

        if !is_valid_quality(self.quality) {
            return Err(TranscodeError::UnsupportedTransform(format!(
                "quality {} must be between {} and {}",
                self.quality, MIN_QUALITY, MAX_QUALITY
            )));
        }

        if self.fit == Fit::Exact && (self.width.is_none() || self.height.is_none()) {
            return Err(TranscodeError::UnsupportedTransform(
                "exact fit requires both width and height".to_string(),
            ));
        }

        Ok(())
    }

    /// Compute output dimensions for a source of `src_width` x `src_height`.
    ///
    /// `Contain` never upscales and keeps the aspect ratio; the result always
    /// fits inside the requested box.
    pub fn target_dimensions(&self, src_width: u32, src_height: u32) -> (u32, u32) {
        if self.fit == Fit::Exact {
            if let (Some(w), Some(h)) = (self.width, self.height) {
                return (w, h);
            }
        }

        let sw = src_width.max(1) as f64;
        let sh = src_height.max(1) as f64;

        let scale_w = self.width.map(|w| w as f64 / sw).unwrap_or(f64::INFINITY);
        let scale_h = self.height.map(|h| h as f64 / sh).unwrap_or(f64::INFINITY);
        let scale = scale_w.min(scale_h).min(1.0);

        let mut w = ((sw * scale).round() as u32).max(1);
        let mut h = ((sh * scale).round() as u32).max(1);
        if let Some(max_w) = self.width {
            w = w.min(max_w);
        }
        if let Some(max_h) = self.height {
            h = h.min(max_h);
        }
        (w, h)
    }
}

/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_QUALITY..=MAX_QUALITY).contains(&quality)
}

/// Clamp quality to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_QUALITY, MAX_QUALITY)
}
