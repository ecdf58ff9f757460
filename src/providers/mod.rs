//! Provider adapters.
//!
//! Every upstream is reached through one [`ProviderAdapter`] implementation
//! per wire protocol family:
//!
//! - [`OpenAiCompatibleAdapter`]: Groq, Cerebras, Mistral and OpenRouter
//! - [`GeminiAdapter`]: Google Gemini
//! - [`CohereAdapter`]: Cohere
//!
//! Adapters never retry; retries and fallback belong to the orchestrator.

pub mod classify;
mod cohere;
mod gemini;
mod openai_compat;

pub use cohere::CohereAdapter;
pub use gemini::GeminiAdapter;
pub use openai_compat::OpenAiCompatibleAdapter;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::ProviderConfig;
use crate::errors::{ConfigError, ErrorKind, ProviderError, ProviderResult};
use crate::observability::elapsed_ms;
use crate::transport::{HttpRequest, HttpTransport, HttpTransportImpl};
use crate::types::chat::{ChatCompletion, ChatCompletionRequest};
use crate::types::query::ProviderId;

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    /// Whether the provider answered the probe.
    pub healthy: bool,
    /// Probe round trip time.
    pub response_time_ms: u64,
    /// Redacted failure description.
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// A successful probe.
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            healthy: true,
            response_time_ms,
            error: None,
        }
    }

    /// A failed probe.
    pub fn unhealthy(response_time_ms: u64, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            response_time_ms,
            error: Some(error.into()),
        }
    }
}

/// Uniform capability surface of an upstream provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider identity.
    fn id(&self) -> ProviderId;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Probes the provider. Never fails: problems are reported in the result.
    async fn health_check(&self) -> HealthCheckResult;

    /// Runs one single-turn completion.
    async fn chat(&self, request: ChatCompletionRequest) -> ProviderResult<ChatCompletion>;
}

/// Creates the adapter for a provider configuration.
pub fn build_adapter(config: ProviderConfig) -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
    let adapter: Arc<dyn ProviderAdapter> = match config.id {
        ProviderId::Groq | ProviderId::Cerebras | ProviderId::Mistral | ProviderId::OpenRouter => {
            Arc::new(OpenAiCompatibleAdapter::new(config)?)
        }
        ProviderId::Gemini => Arc::new(GeminiAdapter::new(config)?),
        ProviderId::Cohere => Arc::new(CohereAdapter::new(config)?),
    };
    Ok(adapter)
}

/// Creates the reqwest transport for a configuration.
fn http_transport(config: &ProviderConfig) -> Result<Arc<dyn HttpTransport>, ConfigError> {
    let transport = HttpTransportImpl::new(&config.base_url, config.timeout)
        .map_err(|e| ConfigError::invalid("transport", e.to_string()))?;
    Ok(Arc::new(transport))
}

/// Sends a request and decodes a successful JSON body.
///
/// Non-success statuses and transport failures are classified; a body that
/// does not decode is reported as [`ErrorKind::Unknown`].
async fn send_json<T: DeserializeOwned>(
    provider: ProviderId,
    transport: &dyn HttpTransport,
    request: HttpRequest,
) -> ProviderResult<(T, u64)> {
    let started = Instant::now();

    let response = transport
        .send(request)
        .await
        .map_err(|e| classify::error_from_transport(provider, &e))?;

    if !response.is_success() {
        let error = classify::error_from_response(provider, &response);
        tracing::debug!(
            provider = %provider,
            status = response.status,
            error_kind = %error.kind,
            "Provider returned an error"
        );
        return Err(error);
    }

    let body = response.json::<T>().map_err(|e| {
        ProviderError::new(
            provider,
            ErrorKind::Unknown,
            format!("Failed to parse response: {e}"),
        )
        .with_status(response.status)
    })?;

    Ok((body, elapsed_ms(started)))
}

/// Runs a probe request bounded by `timeout`.
async fn probe(
    provider: ProviderId,
    transport: &dyn HttpTransport,
    request: HttpRequest,
    timeout: Duration,
) -> HealthCheckResult {
    let started = Instant::now();
    let request = request.with_timeout(timeout);

    match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(Ok(response)) if response.is_success() => HealthCheckResult::healthy(elapsed_ms(started)),
        Ok(Ok(response)) => HealthCheckResult::unhealthy(
            elapsed_ms(started),
            classify::error_from_response(provider, &response).to_string(),
        ),
        Ok(Err(e)) => HealthCheckResult::unhealthy(
            elapsed_ms(started),
            classify::error_from_transport(provider, &e).to_string(),
        ),
        Err(_) => HealthCheckResult::unhealthy(
            elapsed_ms(started),
            format!("{provider} timeout: health check exceeded {timeout:?}"),
        ),
    }
}

/// Error for a response that decoded but carried no text.
fn empty_completion(provider: ProviderId) -> ProviderError {
    ProviderError::new(provider, ErrorKind::Unknown, "Response contained no content")
}
