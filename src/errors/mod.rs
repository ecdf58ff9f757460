//! Error types for the orchestration layer.
//!
//! Only [`OrchestratorError`] ever reaches a caller of the orchestrator.
//! [`ProviderError`] describes a single failed attempt against one upstream
//! provider and is absorbed by the retry and fallback policy; provider
//! exhaustion is turned into a degraded response rather than an error.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::query::ProviderId;

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Result type alias for provider adapter operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// The request was malformed; no provider was contacted.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What is wrong with the request.
        message: String,
        /// The offending field, when known.
        field: Option<String>,
    },

    /// The caller cancelled the request or its time budget ran out.
    #[error("Request cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Creates an invalid request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        OrchestratorError::InvalidRequest {
            message: message.into(),
            field: None,
        }
    }

    /// Creates an invalid request error naming the offending field.
    pub fn invalid_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        OrchestratorError::InvalidRequest {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Machine readable error code, used on the streaming wire format.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidRequest { .. } => "invalid_request",
            OrchestratorError::Cancelled => "cancelled",
        }
    }
}

/// Classification of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider throttled the request (429, quota exhausted).
    RateLimited,
    /// Credentials were rejected (401/403).
    AuthFailed,
    /// The call did not complete in time.
    Timeout,
    /// The provider is down, overloaded or unreachable.
    Unavailable,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Returns true if retrying the same provider may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Unavailable
        )
    }

    /// Snake case name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::AuthFailed => "auth_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed call against one provider.
#[derive(Debug, Clone, Error)]
#[error("{provider} {kind}: {message}")]
pub struct ProviderError {
    /// Provider that failed.
    pub provider: ProviderId,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human readable description (already redacted).
    pub message: String,
    /// HTTP status, if the failure came from a response.
    pub status: Option<u16>,
    /// Server supplied retry hint.
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    /// Creates a provider error.
    pub fn new(provider: ProviderId, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// Attaches the HTTP status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches a retry-after hint.
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Returns true if this error is retryable against the same provider.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Configuration and builder errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is absent.
    #[error("Missing configuration: {message}")]
    Missing {
        /// Description of the missing value.
        message: String,
    },

    /// A setting has an unusable value.
    #[error("Invalid configuration for {field}: {message}")]
    Invalid {
        /// Setting name.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid configuration error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<url::ParseError> for ConfigError {
    fn from(err: url::ParseError) -> Self {
        ConfigError::invalid("base_url", err.to_string())
    }
}

/// Errors from the secret-at-rest layer.
#[derive(Debug, Error)]
pub enum SecretError {
    /// Key material has the wrong size or encoding.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Error message.
        message: String,
    },

    /// Encryption failed.
    #[error("Encryption failed")]
    Encryption,

    /// Decryption failed: wrong key, corrupted or tampered ciphertext.
    #[error("Decryption failed")]
    Decryption,

    /// Ciphertext or nonce could not be decoded.
    #[error("Encoding error: {message}")]
    Encoding {
        /// Error message.
        message: String,
    },

    /// No credential is stored for the provider.
    #[error("No credential stored for {provider}")]
    NotFound {
        /// The provider that was looked up.
        provider: ProviderId,
    },
}

impl From<base64::DecodeError> for SecretError {
    fn from(err: base64::DecodeError) -> Self {
        SecretError::Encoding {
            message: err.to_string(),
        }
    }
}

/// Failure reported by a conversation store or memory provider.
///
/// These collaborators are best effort; the chat pipeline logs the error
/// and carries on.
#[derive(Debug, Clone, Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed.
    pub collaborator: &'static str,
    /// Error message.
    pub message: String,
}

impl CollaboratorError {
    /// Creates a collaborator error.
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}
