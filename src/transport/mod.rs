//! Wire access for provider adapters.
//!
//! Adapters only see the [`HttpTransport`] trait; production wires in the
//! reqwest-backed [`HttpTransportImpl`] and tests use
//! [`MockTransport`](crate::mocks::MockTransport).

mod http;

pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, HttpTransportImpl};

use std::time::Duration;

/// Failures below the HTTP status line.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Underlying client error.
        message: String,
    },

    /// No complete reply within the deadline.
    #[error("Timeout after {timeout:?}")]
    Timeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The reply could not be read.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Underlying client error.
        message: String,
    },
}
