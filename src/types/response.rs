//! Normalized response types.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::ErrorKind;
use crate::types::query::ProviderId;

/// Sentinel reported as `providerUsed` when every provider failed.
pub const SYSTEM_PROVIDER: &str = "system";

/// Who produced a response: a real provider or the degraded fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderUsed {
    /// A real upstream provider.
    Provider(ProviderId),
    /// The offline fallback synthesized after every provider failed.
    System,
}

impl ProviderUsed {
    /// Wire name: the provider id or `"system"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderUsed::Provider(id) => id.as_str(),
            ProviderUsed::System => SYSTEM_PROVIDER,
        }
    }

    /// Returns the provider, unless this is the system fallback.
    pub fn provider(self) -> Option<ProviderId> {
        match self {
            ProviderUsed::Provider(id) => Some(id),
            ProviderUsed::System => None,
        }
    }

    /// Returns true for the degraded fallback.
    pub fn is_system(self) -> bool {
        matches!(self, ProviderUsed::System)
    }
}

impl From<ProviderId> for ProviderUsed {
    fn from(id: ProviderId) -> Self {
        ProviderUsed::Provider(id)
    }
}

impl fmt::Display for ProviderUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProviderUsed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProviderUsed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == SYSTEM_PROVIDER {
            return Ok(ProviderUsed::System);
        }
        raw.parse::<ProviderId>()
            .map(ProviderUsed::Provider)
            .map_err(serde::de::Error::custom)
    }
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input: u32,
    /// Completion tokens.
    pub output: u32,
}

impl TokenUsage {
    /// Creates a usage record.
    pub fn new(input: u32, output: u32) -> Self {
        Self { input, output }
    }

    /// Total tokens.
    pub fn total(&self) -> u32 {
        self.input.saturating_add(self.output)
    }
}

/// Result of trying one provider, retries included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    /// Provider tried.
    pub provider: ProviderId,
    /// Whether the provider eventually answered.
    pub succeeded: bool,
    /// Wall time spent on the provider, backoff waits included.
    pub latency_ms: u64,
    /// Number of calls made to the provider.
    pub attempts: u32,
    /// Classification of the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Redacted description of the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttemptOutcome {
    /// Successful outcome.
    pub fn success(provider: ProviderId, latency_ms: u64, attempts: u32) -> Self {
        Self {
            provider,
            succeeded: true,
            latency_ms,
            attempts,
            error_kind: None,
            error: None,
        }
    }

    /// Failed outcome.
    pub fn failure(
        provider: ProviderId,
        latency_ms: u64,
        attempts: u32,
        kind: ErrorKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            succeeded: false,
            latency_ms,
            attempts,
            error_kind: Some(kind),
            error: Some(error.into()),
        }
    }
}

/// Provider-neutral answer returned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResponse {
    /// Generated text.
    pub content: String,
    /// Conversation the answer belongs to.
    pub conversation_id: String,
    /// Provider that answered, or `"system"` for the degraded fallback.
    pub provider_used: ProviderUsed,
    /// Model that answered.
    pub model_used: String,
    /// Token accounting.
    pub tokens_used: TokenUsage,
    /// End to end latency of the request.
    pub latency_ms: u64,
    /// True when the answer did not come from the first choice.
    pub fallback_used: bool,
    /// True when served from the response cache.
    pub cached: bool,
    /// Chat type of the request.
    pub query_type: String,
    /// Per-provider attempt log, in the order tried.
    #[serde(default)]
    pub attempts: Vec<AttemptOutcome>,
}

impl NormalizedResponse {
    /// Returns true for the offline fallback.
    pub fn is_degraded(&self) -> bool {
        self.provider_used.is_system()
    }
}
