//! Adapter for providers speaking the OpenAI chat completions protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{empty_completion, http_transport, probe, send_json, HealthCheckResult, ProviderAdapter};
use crate::auth::{ApiKeyAuth, AuthProvider};
use crate::config::ProviderConfig;
use crate::errors::{ConfigError, ErrorKind, ProviderError, ProviderResult};
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::chat::{ChatCompletion, ChatCompletionRequest};
use crate::types::query::ProviderId;
use crate::types::response::TokenUsage;

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireAssistantMessage,
}

#[derive(Debug, Deserialize)]
struct WireAssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Adapter for Groq, Cerebras, Mistral and OpenRouter.
pub struct OpenAiCompatibleAdapter {
    id: ProviderId,
    model: String,
    probe_timeout: Duration,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthProvider>,
}

impl OpenAiCompatibleAdapter {
    /// Creates an adapter over a reqwest transport.
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        let transport = http_transport(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Creates an adapter over a custom transport.
    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            id: config.id,
            auth: Arc::new(ApiKeyAuth::bearer(config.api_key().clone())),
            model: config.model,
            probe_timeout: config.probe_timeout,
            transport,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self), fields(provider = %self.id))]
    async fn health_check(&self) -> HealthCheckResult {
        let mut request = HttpRequest::get("models");
        request.headers = self.auth.auth_headers();
        probe(self.id, self.transport.as_ref(), request, self.probe_timeout).await
    }

    #[instrument(skip(self, request), fields(provider = %self.id))]
    async fn chat(&self, request: ChatCompletionRequest) -> ProviderResult<ChatCompletion> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = WireRequest {
            model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: false,
        };

        let mut http_request = HttpRequest::post("chat/completions")
            .with_json(&body)
            .map_err(|e| ProviderError::new(self.id, ErrorKind::Unknown, e.to_string()))?;
        http_request.headers.extend(self.auth.auth_headers());
        if let Some(timeout) = request.timeout {
            http_request = http_request.with_timeout(timeout);
        }

        let (response, latency_ms) =
            send_json::<WireResponse>(self.id, self.transport.as_ref(), http_request).await?;

        let content = response
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| empty_completion(self.id))?;

        let tokens_used = response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(ChatCompletion {
            content,
            model_used: response.model.unwrap_or_else(|| model.to_string()),
            tokens_used,
            latency_ms,
        })
    }
}

impl std::fmt::Debug for OpenAiCompatibleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleAdapter")
            .field("id", &self.id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
