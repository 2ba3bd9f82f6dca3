use bytes::Bytes;

use crate::store::AssetId;
use crate::transcode::{ImageKind, TranscodedImage, TransformSpec};

/// Cache key: one derivative per (asset, transform).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivativeKey {
    pub asset_id: AssetId,
    pub spec: TransformSpec,
}

impl DerivativeKey {
    pub fn new(asset_id: AssetId, spec: TransformSpec) -> Self {
        Self { asset_id, spec }
    }
}

/// A generated variant of an asset.
///
/// `kind` is the format actually produced, which differs from the requested
/// one when the engine had to fall back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub asset_id: AssetId,
    pub spec: TransformSpec,
    pub data: Bytes,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub generated_at: u64,
}

impl Derivative {
    pub fn from_transcoded(asset_id: AssetId, spec: TransformSpec, image: TranscodedImage) -> Self {
        Self {
            asset_id,
            spec,
            data: image.data,
            kind: image.kind,
            width: image.width,
            height: image.height,
            generated_at: crate::unix_now(),
        }
    }

    pub fn key(&self) -> DerivativeKey {
        DerivativeKey::new(self.asset_id.clone(), self.spec)
    }

    pub fn content_length(&self) -> usize {
        self.data.len()
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }
}
