//! Asset store for uploaded originals.
//!
//! Assets are content-addressed: the id is the SHA-256 of the owner and the
//! payload, so re-uploading identical bytes is idempotent. Persistence goes
//! through a [`BlobBackend`]:
//!
//! - [`MemoryBackend`]: process-local, for tests and ephemeral deployments
//! - [`FsBackend`]: local directory, atomic rename with a JSON sidecar
//! - [`S3Backend`]: S3 or any S3-compatible object store
//!
//! Deletions fan out to registered [`AssetListener`]s so derived data can be
//! dropped alongside the original.

mod asset;
mod backend;
mod fs;
mod s3;

pub use asset::{
    Asset, AssetId, AssetInfo, AssetListener, AssetStore, RetryPolicy, DEFAULT_MAX_UPLOAD_BYTES,
};
pub use backend::{BlobBackend, BlobMetadata, MemoryBackend};
pub use fs::FsBackend;
pub use s3::{create_s3_client, S3Backend};
