use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StorageError;

/// Metadata persisted alongside each blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub owner: String,
    pub mime_type: String,
    pub created_at: u64,
    pub size: u64,
}

/// Byte storage the asset store persists originals into.
///
/// Writes must be atomic from a reader's perspective: a concurrent `get`
/// sees either nothing or the complete blob with its metadata.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store a blob under `key`, replacing any existing one.
    async fn put(&self, key: &str, data: Bytes, metadata: BlobMetadata)
        -> Result<(), StorageError>;

    /// Fetch a blob and its metadata, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<(Bytes, BlobMetadata)>, StorageError>;

    /// Fetch only the metadata.
    ///
    /// Backends that can answer without transferring the payload should
    /// override this.
    async fn head(&self, key: &str) -> Result<Option<BlobMetadata>, StorageError> {
        Ok(self.get(key).await?.map(|(_, metadata)| metadata))
    }

    /// Remove a blob. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &'static str;
}

/// Process-local backend. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<String, (Bytes, BlobMetadata)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: BlobMetadata,
    ) -> Result<(), StorageError> {
        self.blobs
            .write()
            .await
            .insert(key.to_string(), (data, metadata));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, BlobMetadata)>, StorageError> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn head(&self, key: &str) -> Result<Option<BlobMetadata>, StorageError> {
        Ok(self
            .blobs
            .read()
            .await
            .get(key)
            .map(|(_, metadata)| metadata.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
