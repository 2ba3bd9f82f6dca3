use std::fmt;

use bytes::Bytes;

use super::stage::StageTrace;
use crate::error::ResponseCode;
use crate::transcode::TransformSpec;

/// Verbs understood by [`Pipeline::handle`](super::Pipeline::handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

/// Transport-neutral request.
///
/// `GET` and `DELETE` need `asset_id`; `PUT` needs `body` and `mime_type`.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub method: Method,
    pub asset_id: Option<String>,
    pub transform: Option<TransformSpec>,
    pub token: Option<String>,
    pub body: Option<Bytes>,
    pub mime_type: Option<String>,
}

impl PipelineRequest {
    pub fn get(asset_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            method: Method::Get,
            asset_id: Some(asset_id.into()),
            transform: None,
            token,
            body: None,
            mime_type: None,
        }
    }

    pub fn put(body: Bytes, mime_type: impl Into<String>, token: Option<String>) -> Self {
        Self {
            method: Method::Put,
            asset_id: None,
            transform: None,
            token,
            body: Some(body),
            mime_type: Some(mime_type.into()),
        }
    }

    pub fn delete(asset_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            method: Method::Delete,
            asset_id: Some(asset_id.into()),
            transform: None,
            token,
            body: None,
            mime_type: None,
        }
    }

    pub fn with_transform(mut self, transform: TransformSpec) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Transport-neutral response.
#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub code: ResponseCode,
    pub body: Option<Bytes>,
    pub mime_type: Option<String>,
    /// Error message for non-`Ok` codes
    pub message: Option<String>,
    pub trace: StageTrace,
}

impl PipelineResponse {
    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }
}
