use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::backend::{BlobBackend, BlobMetadata};
use crate::error::StorageError;
use crate::transcode::ImageKind;

/// Default maximum upload size (10 MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Content-derived asset identifier: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(Arc<str>);

impl AssetId {
    /// Hash of the owner and the payload.
    ///
    /// The owner is length-prefixed so distinct (owner, payload) pairs can
    /// never produce the same input to the hash.
    pub fn for_content(owner: &str, data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((owner.len() as u64).to_be_bytes());
        hasher.update(owner.as_bytes());
        hasher.update(data);
        Self(hex::encode(hasher.finalize()).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AssetId {
    type Err = StorageError;

    /// Anything that is not a well-formed id cannot name a stored asset.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(Self(s.into()))
        } else {
            Err(StorageError::NotFound(s.to_string()))
        }
    }
}

impl Serialize for AssetId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored original image. Immutable.
#[derive(Debug, Clone)]
pub struct Asset {
    pub id: AssetId,
    pub owner: String,
    pub data: Bytes,
    pub kind: ImageKind,
    pub created_at: u64,
}

impl Asset {
    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn info(&self) -> AssetInfo {
        AssetInfo {
            id: self.id.clone(),
            owner: self.owner.clone(),
            mime_type: self.mime_type().to_string(),
            size: self.data.len() as u64,
            created_at: self.created_at,
        }
    }
}

/// Asset metadata without the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetInfo {
    pub id: AssetId,
    pub owner: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: u64,
}

impl AssetInfo {
    fn from_metadata(id: AssetId, metadata: BlobMetadata) -> Self {
        Self {
            id,
            owner: metadata.owner,
            mime_type: metadata.mime_type,
            size: metadata.size,
            created_at: metadata.created_at,
        }
    }
}

/// Notified after an asset is removed from the store.
#[async_trait]
pub trait AssetListener: Send + Sync {
    async fn asset_deleted(&self, id: &AssetId);
}

/// Bounded exponential backoff for backend writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Content-addressed store of original uploads.
pub struct AssetStore {
    backend: Arc<dyn BlobBackend>,
    max_size: usize,
    retry: RetryPolicy,
    listeners: Vec<Arc<dyn AssetListener>>,
}

impl AssetStore {
    pub fn new(backend: Arc<dyn BlobBackend>, max_size: usize) -> Self {
        Self {
            backend,
            max_size,
            retry: RetryPolicy::default(),
            listeners: Vec::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register a listener for deletions.
    pub fn with_listener(mut self, listener: Arc<dyn AssetListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Validate and persist an upload.
    ///
    /// Identical bytes from the same owner map to the same id; a repeat
    /// upload returns the existing asset without writing again.
    pub async fn put(&self, data: Bytes, mime: &str, owner: &str) -> Result<Asset, StorageError> {
        if data.is_empty() {
            return Err(StorageError::EmptyPayload);
        }
        if data.len() > self.max_size {
            return Err(StorageError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let kind = ImageKind::from_mime_type(mime).ok_or_else(|| {
            StorageError::UnsupportedMediaType(format!(
                "{} (accepted: {})",
                mime,
                ImageKind::ACCEPTED_MIME_TYPES.join(", ")
            ))
        })?;
        match ImageKind::sniff(&data) {
            Some(sniffed) if sniffed == kind => {}
            Some(sniffed) => {
                return Err(StorageError::UnsupportedMediaType(format!(
                    "declared {} but payload is {}",
                    kind, sniffed
                )))
            }
            None => {
                return Err(StorageError::UnsupportedMediaType(format!(
                    "payload is not a recognizable {} image",
                    kind
                )))
            }
        }

        let id = AssetId::for_content(owner, &data);

        // Same owner and bytes hash to the same id, so the stored payload is ours
        if let Some(metadata) = self.backend.head(id.as_str()).await? {
            debug!(asset_id = %id, owner, "Upload matches existing asset");
            return asset_from_parts(id, data, metadata);
        }

        let metadata = BlobMetadata {
            owner: owner.to_string(),
            mime_type: kind.mime_type().to_string(),
            created_at: crate::unix_now(),
            size: data.len() as u64,
        };
        self.write_with_retry(&id, &data, &metadata).await?;

        info!(
            asset_id = %id,
            owner,
            mime_type = kind.mime_type(),
            size = data.len(),
            backend = self.backend.name(),
            "Stored asset"
        );

        Ok(Asset {
            id,
            owner: owner.to_string(),
            data,
            kind,
            created_at: metadata.created_at,
        })
    }

    /// Load an asset with its payload.
    pub async fn get(&self, id: &AssetId) -> Result<Asset, StorageError> {
        let (data, metadata) = self
            .backend
            .get(id.as_str())
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        asset_from_parts(id.clone(), data, metadata)
    }

    /// Load metadata only.
    pub async fn info(&self, id: &AssetId) -> Result<AssetInfo, StorageError> {
        let metadata = self
            .backend
            .head(id.as_str())
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        Ok(AssetInfo::from_metadata(id.clone(), metadata))
    }

    /// Remove an asset on behalf of its owner and notify listeners.
    pub async fn delete(&self, id: &AssetId, requester: &str) -> Result<AssetInfo, StorageError> {
        let info = self.info(id).await?;
        if info.owner != requester {
            return Err(StorageError::NotOwner(id.to_string()));
        }

        self.backend.delete(id.as_str()).await?;

        for listener in &self.listeners {
            listener.asset_deleted(id).await;
        }

        info!(asset_id = %id, owner = requester, "Deleted asset");
        Ok(info)
    }

    async fn write_with_retry(
        &self,
        id: &AssetId,
        data: &Bytes,
        metadata: &BlobMetadata,
    ) -> Result<(), StorageError> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_interval)
            .with_max_interval(self.retry.max_interval)
            .with_max_elapsed_time(None)
            .build();

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let backend = &self.backend;
        let max_attempts = self.retry.max_attempts.max(1);

        backoff::future::retry(backoff, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match backend.put(id.as_str(), data.clone(), metadata.clone()).await {
                Ok(()) => Ok(()),
                Err(StorageError::WriteFailure(msg)) if attempt < max_attempts => {
                    warn!(asset_id = %id, attempt, error = %msg, "Asset write failed, retrying");
                    Err(backoff::Error::transient(StorageError::WriteFailure(msg)))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }
}

fn asset_from_parts(
    id: AssetId,
    data: Bytes,
    metadata: BlobMetadata,
) -> Result<Asset, StorageError> {
    let kind = ImageKind::from_mime_type(&metadata.mime_type).ok_or_else(|| {
        StorageError::ReadFailure(format!(
            "asset {} has unexpected stored type {}",
            id, metadata.mime_type
        ))
    })?;
    Ok(Asset {
        id,
        owner: metadata.owner,
        data,
        kind,
        created_at: metadata.created_at,
    })
}
