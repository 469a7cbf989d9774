//! Error taxonomy for the protocol client
//!
//! Mirrors spec §4.2 and §4.1: manifest validation errors are a distinct,
//! structured enum since callers (the registry) branch on the failing
//! constraint; transport errors are a second enum covering the HTTP surface.

use thiserror::Error;

/// Errors from `validate_manifest`.
///
/// Structured so a caller can render "the offending constraint" (spec §7,
/// "Install that failed validation ... error describes the failing
/// constraint") without string-matching.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest exceeds {max} bytes")]
    SizeExceeded { max: usize },

    #[error("manifest is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("manifest is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("manifest id `{0}` is invalid (expected 1-100 chars of [A-Za-z0-9._-])")]
    InvalidId(String),

    #[error("manifest version `{0}` is not a valid semver-like version")]
    InvalidVersion(String),

    #[error("manifest declares resources inconsistent with its catalogs/types: {0}")]
    InconsistentResources(String),

    #[error("field `{field}` exceeds max length {max}")]
    FieldTooLong { field: &'static str, max: usize },
}

/// Errors surfaced by [`crate::client::ProtocolClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("request timed out")]
    Timeout,

    #[error("http error: {0}")]
    HttpError(u16),

    #[error("failed to parse response: {0}")]
    ParseError(String),

    #[error("response exceeded {max} bytes")]
    SizeExceeded { max: usize },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

impl From<ManifestError> for ClientError {
    fn from(e: ManifestError) -> Self {
        ClientError::ParseError(e.to_string())
    }
}

impl ClientError {
    /// Whether this error is worth retrying per spec §4.2's transport
    /// contract: 5xx and network errors are retried, 4xx is terminal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::NetworkError(_) | ClientError::Timeout => true,
            ClientError::HttpError(status) => (500..600).contains(status),
            ClientError::ParseError(_)
            | ClientError::SizeExceeded { .. }
            | ClientError::ValidationError(_)
            | ClientError::InvalidUrl(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
