//! Failure classification for provider calls.
//!
//! Status codes decide first; only unmapped statuses and transport-level
//! failures fall through to message heuristics.

use std::time::Duration;

use serde_json::Value;

use crate::errors::{ErrorKind, ProviderError};
use crate::observability::redact;
use crate::transport::{HttpResponse, TransportError};
use crate::types::query::ProviderId;

const MAX_MESSAGE_LEN: usize = 500;

/// Maps an HTTP status onto an error kind, if the status is decisive.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::AuthFailed),
        429 => Some(ErrorKind::RateLimited),
        408 | 504 => Some(ErrorKind::Timeout),
        500 | 502 | 503 => Some(ErrorKind::Unavailable),
        _ => None,
    }
}

/// Classifies a failure from its description alone.
pub fn classify_message(message: &str) -> ErrorKind {
    let message = message.to_ascii_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if contains_any(&["rate limit", "rate_limit", "quota", "too many requests"]) {
        ErrorKind::RateLimited
    } else if contains_any(&["api key", "api_key", "unauthorized", "invalid auth"]) {
        ErrorKind::AuthFailed
    } else if contains_any(&["timed out", "timeout"]) {
        ErrorKind::Timeout
    } else if contains_any(&["unavailable", "overloaded"]) {
        ErrorKind::Unavailable
    } else {
        ErrorKind::Unknown
    }
}

/// Classifies a failure from its status, falling back to the message.
pub fn classify(status: Option<u16>, message: &str) -> ErrorKind {
    status
        .and_then(classify_status)
        .unwrap_or_else(|| classify_message(message))
}

/// Builds a provider error from a non-success response.
pub fn error_from_response(provider: ProviderId, response: &HttpResponse) -> ProviderError {
    let message = redact(&extract_message(response));
    let kind = classify(Some(response.status), &message);

    ProviderError::new(provider, kind, message)
        .with_status(response.status)
        .with_retry_after(parse_retry_after(response))
}

/// Builds a provider error from a transport failure.
pub fn error_from_transport(provider: ProviderId, error: &TransportError) -> ProviderError {
    let kind = match error {
        TransportError::Timeout { .. } => ErrorKind::Timeout,
        TransportError::Connection { .. } => ErrorKind::Unavailable,
        TransportError::InvalidResponse { message } => classify_message(message),
    };

    ProviderError::new(provider, kind, redact(&error.to_string()))
}

/// Pulls the human readable message out of an error body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`; anything else is returned as truncated text.
fn extract_message(response: &HttpResponse) -> String {
    if let Ok(body) = response.json::<Value>() {
        let message = body
            .pointer("/error/message")
            .or_else(|| body.get("error").filter(|e| e.is_string()))
            .or_else(|| body.get("message"))
            .and_then(Value::as_str);

        if let Some(message) = message {
            return message.to_string();
        }
    }

    let text = response.text();
    let text = text.trim();
    if text.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        text.chars().take(MAX_MESSAGE_LEN).collect()
    }
}

fn parse_retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .headers
        .get("retry-after")
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
