//! Engine Error Types
//!
//! Error hierarchy for the token lifecycle engine. The two loop-fatal classes
//! (`IssuanceDenied`, `PostFailed`) are top-level variants; resource request
//! outcomes live in [`RequestError`] because they never unwind a loop.

use std::time::Duration;
use thiserror::Error;

/// Root error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Token issuance denied for audience '{audience}' scope '{scope}': {reason}")]
    IssuanceDenied {
        audience: String,
        scope: String,
        reason: String,
    },

    #[error("Token installation at {address} failed: {reason}")]
    PostFailed { address: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ACE_CONFIG",
            Self::IssuanceDenied { .. } => "ACE_ISSUANCE_DENIED",
            Self::PostFailed { .. } => "ACE_POST_FAILED",
            Self::Network(_) => "ACE_NETWORK",
            Self::Protocol(_) => "ACE_PROTOCOL",
            Self::Store(_) => "ACE_STORE",
        }
    }

    /// Whether this error ends the access loop that hit it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IssuanceDenied { .. } | Self::PostFailed { .. })
    }

    pub(crate) fn issuance_denied(
        audience: &str,
        scope: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::IssuanceDenied {
            audience: audience.to_string(),
            scope: scope.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn post_failed(address: &str, reason: impl Into<String>) -> Self {
        Self::PostFailed {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid server address '{address}': {message}")]
    InvalidAddress { address: String, message: String },
}

/// Network/transport error.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("{server} unreachable after {attempts} attempts")]
    Unreachable { server: String, attempts: u32 },

    #[error("Stream closed: {message}")]
    StreamClosed { message: String },
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unreachable { .. })
    }
}

/// Protocol/response parsing error.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },
}

/// Token store error.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Token {fingerprint} was already purged and cannot be cached again")]
    Retired { fingerprint: String },

    #[error("Token {fingerprint} not found")]
    NotFound { fingerprint: String },
}

/// Outcome class of a failed resource request.
///
/// Only [`RequestError::AuthorizationDenial`] counts toward a loop's denial
/// budget. Repeated transient failures never force a renewal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Authorization denied (status {status})")]
    AuthorizationDenial { status: u16 },

    #[error("Request failed: {message}")]
    Transient { message: String },
}

impl RequestError {
    /// Whether this outcome feeds the denial budget.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::AuthorizationDenial { .. })
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Classify an HTTP status from a resource server.
pub fn classify_resource_status(status: u16, body: &str) -> Result<(), RequestError> {
    match status {
        200..=299 => Ok(()),
        401 => Err(RequestError::AuthorizationDenial { status }),
        _ => Err(RequestError::Transient {
            message: format!("HTTP {}: {}", status, body),
        }),
    }
}
