use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::backend::{BlobBackend, BlobMetadata};
use crate::error::StorageError;

const META_OWNER: &str = "owner";
const META_CREATED_AT: &str = "created-at";

/// S3 (or S3-compatible) backend.
///
/// The payload is the object body; owner and creation time travel as
/// user-defined object metadata, the MIME type as `Content-Type`. A single
/// PUT is atomic, so readers never observe partial objects.
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    pub fn new(client: Client, bucket: impl Into<String>, prefix: Option<String>) -> Self {
        let prefix = prefix
            .map(|p| {
                let p = p.trim_matches('/').to_string();
                if p.is_empty() {
                    p
                } else {
                    format!("{}/", p)
                }
            })
            .unwrap_or_default();

        Self {
            client,
            bucket: bucket.into(),
            prefix,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.object_key(key))
    }
}

/// Rebuild metadata from object headers.
fn parse_metadata(
    location: &str,
    user: Option<&HashMap<String, String>>,
    content_type: Option<&str>,
    content_length: Option<i64>,
) -> Result<BlobMetadata, StorageError> {
    let user = user.ok_or_else(|| {
        StorageError::ReadFailure(format!("{}: object has no metadata", location))
    })?;
    let owner = user.get(META_OWNER).cloned().ok_or_else(|| {
        StorageError::ReadFailure(format!("{}: missing {} metadata", location, META_OWNER))
    })?;
    let created_at = user
        .get(META_CREATED_AT)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Ok(BlobMetadata {
        owner,
        mime_type: content_type
            .unwrap_or("application/octet-stream")
            .to_string(),
        created_at,
        size: content_length.unwrap_or(0).max(0) as u64,
    })
}

/// Whether an SDK error means the object does not exist.
fn is_not_found<E: std::fmt::Debug>(err: &SdkError<E>) -> bool {
    if let Some(raw) = err.raw_response() {
        if raw.status().as_u16() == 404 {
            return true;
        }
    }
    let text = format!("{:?}", err);
    text.contains("NoSuchKey") || text.contains("NotFound")
}

#[async_trait]
impl BlobBackend for S3Backend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: BlobMetadata,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .content_type(&metadata.mime_type)
            .metadata(META_OWNER, &metadata.owner)
            .metadata(META_CREATED_AT, metadata.created_at.to_string())
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::WriteFailure(format!("{}: {}", self.location(key), e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, BlobMetadata)>, StorageError> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailure(format!(
                    "{}: {}",
                    self.location(key),
                    e
                )))
            }
        };

        let metadata = parse_metadata(
            &self.location(key),
            resp.metadata(),
            resp.content_type(),
            resp.content_length(),
        )?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ReadFailure(format!("{}: {}", self.location(key), e)))?
            .into_bytes();

        Ok(Some((data, metadata)))
    }

    async fn head(&self, key: &str) -> Result<Option<BlobMetadata>, StorageError> {
        let resp = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if missing || is_not_found(&e) {
                    return Ok(None);
                }
                return Err(StorageError::ReadFailure(format!(
                    "{}: {}",
                    self.location(key),
                    e
                )));
            }
        };

        parse_metadata(
            &self.location(key),
            resp.metadata(),
            resp.content_type(),
            resp.content_length(),
        )
        .map(Some)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        // DeleteObject succeeds on missing keys, so probe first
        if self.head(key).await?.is_none() {
            return Ok(false);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| StorageError::WriteFailure(format!("{}: {}", self.location(key), e)))?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Custom endpoints (MinIO and friends) switch to path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);
    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}
