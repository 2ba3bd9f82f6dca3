use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::backend::{BlobBackend, BlobMetadata};
use crate::error::StorageError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local filesystem backend.
///
/// Each blob is stored as `<root>/<key[..2]>/<key>` with a JSON sidecar at
/// `<key>.json`. Both are written to a temporary file and renamed into
/// place; the sidecar lands last, so a visible sidecar implies complete
/// data.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Create the root directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::WriteFailure(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = key.len() >= 2
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(StorageError::ReadFailure(format!("invalid blob key: {:?}", key)));
        }
        Ok(self.root.join(&key[..2]))
    }

    fn data_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.shard_dir(key)?.join(key))
    }

    fn sidecar_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.shard_dir(key)?.join(format!("{}.json", key)))
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension(format!(
        "tmp-{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let to_failure = |e: std::io::Error| {
        StorageError::WriteFailure(format!("{}: {}", path.display(), e))
    };

    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(to_failure(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(to_failure(e));
    }
    Ok(())
}

#[async_trait]
impl BlobBackend for FsBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: BlobMetadata,
    ) -> Result<(), StorageError> {
        let dir = self
            .shard_dir(key)
            .map_err(|e| StorageError::WriteFailure(e.to_string()))?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::WriteFailure(format!("{}: {}", dir.display(), e)))?;

        let sidecar = serde_json::to_vec(&metadata)
            .map_err(|e| StorageError::WriteFailure(e.to_string()))?;

        write_atomic(&self.data_path(key)?, &data).await?;
        write_atomic(&self.sidecar_path(key)?, &sidecar).await
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, BlobMetadata)>, StorageError> {
        let Some(metadata) = self.head(key).await? else {
            return Ok(None);
        };

        let path = self.data_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some((Bytes::from(data), metadata))),
            // Deleted between the two reads
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailure(format!("{}: {}", path.display(), e))),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<BlobMetadata>, StorageError> {
        let path = self.sidecar_path(key)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailure(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| StorageError::ReadFailure(format!("{}: {}", path.display(), e)))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let sidecar = self
            .sidecar_path(key)
            .map_err(|e| StorageError::WriteFailure(e.to_string()))?;

        // Sidecar goes first so readers stop seeing the blob immediately
        let existed = match tokio::fs::remove_file(&sidecar).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(StorageError::WriteFailure(format!(
                    "{}: {}",
                    sidecar.display(),
                    e
                )))
            }
        };

        let data = self.data_path(key)?;
        match tokio::fs::remove_file(&data).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(existed),
            Err(e) => Err(StorageError::WriteFailure(format!("{}: {}", data.display(), e))),
        }
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}
