//! Stream frame types and their wire encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::types::response::{NormalizedResponse, ProviderUsed, TokenUsage};

/// Hint attached to metadata of a degraded response.
pub const DEGRADED_HINT: &str =
    "All AI providers are currently unavailable. Check provider API keys and quotas.";

const ENCODING_FAILURE: &str =
    r#"{"type":"error","error":"Failed to encode frame","code":"internal"}"#;

/// Payload of a `start` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartData {
    /// When streaming began.
    pub timestamp: DateTime<Utc>,
    /// Provider the caller asked for, if any.
    #[serde(default)]
    pub provider: Option<String>,
}

/// Payload of a `metadata` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataData {
    /// Provider that answered, or `system`.
    pub provider: ProviderUsed,
    /// Model that answered.
    pub model: String,
    /// Whether the answer came from a fallback.
    pub fallback_used: bool,
    /// Whether the answer came from the cache.
    pub cached: bool,
    /// Chat type of the request.
    pub query_type: String,
    /// Advice for the caller, present only on degraded responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Payload of a `content` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentData {
    /// A chunk of the answer.
    pub content: String,
}

/// Payload of an `end` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndData {
    /// End to end latency.
    pub latency_ms: u64,
    /// Token accounting.
    pub tokens_used: TokenUsage,
}

/// One event of a streamed answer.
///
/// A stream is `start`, then either `metadata`, one or more `content`
/// frames and `end`, or a single `error`. Nothing follows `end` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Streaming began.
    Start {
        /// Frame payload.
        data: StartData,
    },
    /// Who answered and how.
    Metadata {
        /// Frame payload.
        data: MetadataData,
    },
    /// Answer text.
    Content {
        /// Frame payload.
        data: ContentData,
    },
    /// Successful end of the stream.
    End {
        /// Frame payload.
        data: EndData,
    },
    /// Failed end of the stream.
    Error {
        /// Human readable description.
        error: String,
        /// Machine readable code.
        code: String,
    },
}

impl StreamFrame {
    /// `start` frame stamped now.
    pub fn start(provider: Option<String>) -> Self {
        StreamFrame::Start {
            data: StartData {
                timestamp: Utc::now(),
                provider,
            },
        }
    }

    /// `metadata` frame for a response.
    pub fn metadata(response: &NormalizedResponse) -> Self {
        StreamFrame::Metadata {
            data: MetadataData {
                provider: response.provider_used,
                model: response.model_used.clone(),
                fallback_used: response.fallback_used,
                cached: response.cached,
                query_type: response.query_type.clone(),
                hint: response
                    .is_degraded()
                    .then(|| DEGRADED_HINT.to_string()),
            },
        }
    }

    /// `content` frame.
    pub fn content(content: impl Into<String>) -> Self {
        StreamFrame::Content {
            data: ContentData {
                content: content.into(),
            },
        }
    }

    /// `end` frame for a response.
    pub fn end(response: &NormalizedResponse) -> Self {
        StreamFrame::End {
            data: EndData {
                latency_ms: response.latency_ms,
                tokens_used: response.tokens_used,
            },
        }
    }

    /// `error` frame for an orchestrator error.
    pub fn error(error: &OrchestratorError) -> Self {
        StreamFrame::Error {
            error: error.to_string(),
            code: error.code().to_string(),
        }
    }

    /// Frames following `start` for a successful answer.
    pub fn for_response(response: &NormalizedResponse) -> Vec<Self> {
        vec![
            Self::metadata(response),
            Self::content(response.content.clone()),
            Self::end(response),
        ]
    }

    /// Wire name of the frame type.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamFrame::Start { .. } => "start",
            StreamFrame::Metadata { .. } => "metadata",
            StreamFrame::Content { .. } => "content",
            StreamFrame::End { .. } => "end",
            StreamFrame::Error { .. } => "error",
        }
    }

    /// Returns true for `end` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::End { .. } | StreamFrame::Error { .. })
    }

    /// JSON encoding of the frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire encoding: `data: <JSON>\n\n`.
    pub fn to_sse(&self) -> String {
        match self.to_json() {
            Ok(json) => format!("data: {json}\n\n"),
            Err(e) => {
                tracing::error!(error = %e, frame = self.kind(), "Failed to encode frame");
                format!("data: {ENCODING_FAILURE}\n\n")
            }
        }
    }
}
