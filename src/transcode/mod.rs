//! Transcode layer.
//!
//! Turns an original image into a derivative: decode, resize, encode.
//!
//! # Components
//!
//! - [`TransformSpec`]: dimensions, fit, output format and quality of a derivative
//! - [`Transcoder`]: the engine seam; [`ImageTranscoder`] is the `image`-crate implementation
//! - [`FallbackPolicy`]: ordered formats tried when the requested one cannot be produced
//! - [`TranscodePool`]: bounds concurrent CPU work on the blocking thread pool
//!
//! # Example
//!
//! ```
//! use image_pipeline::transcode::{ImageTranscoder, OutputFormat, TransformSpec, Transcoder};
//!
//! let engine = ImageTranscoder::default();
//! let spec = TransformSpec::bounded(200, 150).with_format(OutputFormat::WebP);
//!
//! // Zero-width requests are rejected before any decoding happens
//! assert!(engine.validate(&spec.with_width(0)).is_err());
//! assert!(engine.validate(&spec).is_ok());
//! ```

mod engine;
mod pool;
mod spec;

pub use engine::{
    FallbackPolicy, ImageTranscoder, TranscodedImage, Transcoder, DEFAULT_MAX_DIMENSION,
    DEFAULT_MAX_SOURCE_DIMENSION, ENGINE_VERSION,
};
pub use pool::TranscodePool;
pub use spec::{
    clamp_quality, is_valid_quality, Fit, ImageKind, OutputFormat, TransformSpec, DEFAULT_QUALITY,
    MAX_QUALITY, MIN_QUALITY,
};
