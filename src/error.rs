use thiserror::Error;

use crate::auth::Operation;

/// Errors produced while verifying a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Token expiry is in the past
    #[error("Token expired at {expired_at} (current time: {current_time})")]
    Expired { expired_at: u64, current_time: u64 },

    /// Signature does not match, or the signing key is unknown
    #[error("Invalid token signature")]
    BadSignature,

    /// Token is not a well-formed `header.claims.signature` triple
    #[error("Malformed token: {0}")]
    Malformed(String),
}

/// Errors produced while issuing a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// No key registered under the requested key id
    #[error("Signing key '{0}' is not available")]
    KeyUnavailable(String),

    /// Key material too short for HMAC-SHA256
    #[error("Signing key '{kid}' is too short: {len} bytes, need at least {min}")]
    KeyTooShort { kid: String, len: usize, min: usize },

    /// Claims could not be serialized
    #[error("Failed to encode token claims: {0}")]
    Encode(String),
}

/// Reasons the access policy guard refuses a request.
///
/// These are surfaced verbatim to callers; they never carry internal detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyDenial {
    /// No token, or a token that failed verification
    #[error("Authentication required")]
    Unauthenticated,

    /// Token was well-formed but has expired
    #[error("Token expired")]
    Expired,

    /// Token scopes do not include the requested operation
    #[error("Token scope does not permit {0}")]
    ScopeInsufficient(Operation),

    /// Asset belongs to another subject
    #[error("Asset is owned by another subject")]
    NotOwner,
}

impl From<AuthError> for PolicyDenial {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Expired { .. } => PolicyDenial::Expired,
            AuthError::BadSignature | AuthError::Malformed(_) => PolicyDenial::Unauthenticated,
        }
    }
}

/// Asset store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No asset with this id
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Upload body was empty
    #[error("Payload is empty")]
    EmptyPayload,

    /// Upload exceeds the configured maximum size
    #[error("Payload too large: {size} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// MIME type not accepted, or payload does not match it
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Requester is not the asset owner
    #[error("Requester is not the owner of asset {0}")]
    NotOwner(String),

    /// Backend write failed after all retries
    #[error("Write failure: {0}")]
    WriteFailure(String),

    /// Backend read failed
    #[error("Read failure: {0}")]
    ReadFailure(String),
}

/// Transcode engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscodeError {
    /// Source bytes are not a decodable image
    #[error("Failed to decode image: {0}")]
    DecodeError(String),

    /// Transform parameters are out of range
    #[error("Unsupported transform: {0}")]
    UnsupportedTransform(String),

    /// Encoder failed for every candidate format
    #[error("Failed to encode image: {0}")]
    EncodeError(String),
}

/// Top-level error returned by the pipeline orchestrator.
///
/// `Clone` so one in-flight computation can hand the same failure to
/// every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Denied(#[from] PolicyDenial),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Malformed request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unexpected failure (worker panic, closed channel)
    #[error("Internal failure: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Map to the response code surfaced to the framework layer.
    pub fn code(&self) -> ResponseCode {
        match self {
            PipelineError::Denied(_) => ResponseCode::Denied,
            PipelineError::Storage(err) => match err {
                StorageError::NotFound(_) => ResponseCode::NotFound,
                StorageError::EmptyPayload => ResponseCode::InvalidRequest,
                StorageError::PayloadTooLarge { .. } => ResponseCode::PayloadTooLarge,
                StorageError::UnsupportedMediaType(_) => ResponseCode::UnsupportedMediaType,
                StorageError::NotOwner(_) => ResponseCode::Denied,
                StorageError::WriteFailure(_) | StorageError::ReadFailure(_) => {
                    ResponseCode::InternalFailure
                }
            },
            PipelineError::Transcode(err) => match err {
                TranscodeError::DecodeError(_) => ResponseCode::DecodeError,
                TranscodeError::UnsupportedTransform(_) => ResponseCode::UnsupportedTransform,
                TranscodeError::EncodeError(_) => ResponseCode::InternalFailure,
            },
            PipelineError::Signing(_) | PipelineError::Internal(_) => ResponseCode::InternalFailure,
            PipelineError::InvalidRequest(_) => ResponseCode::InvalidRequest,
        }
    }
}

/// Protocol-neutral outcome codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    Denied,
    NotFound,
    PayloadTooLarge,
    UnsupportedMediaType,
    DecodeError,
    UnsupportedTransform,
    InvalidRequest,
    InternalFailure,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Ok => "ok",
            ResponseCode::Denied => "denied",
            ResponseCode::NotFound => "not_found",
            ResponseCode::PayloadTooLarge => "payload_too_large",
            ResponseCode::UnsupportedMediaType => "unsupported_media_type",
            ResponseCode::DecodeError => "decode_error",
            ResponseCode::UnsupportedTransform => "unsupported_transform",
            ResponseCode::InvalidRequest => "invalid_request",
            ResponseCode::InternalFailure => "internal_failure",
        }
    }
}
