//! Cohere adapter (`/v1/chat`).

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
use crate::types::chat::{ChatCompletion, ChatCompletionRequest, Role};
use crate::types::query::ProviderId;
use crate::types::response::TokenUsage;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    preamble: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    chat_history: Vec<HistoryMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct HistoryMessage<'a> {
    role: &'static str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    meta: Option<ApiMeta>,
}

#[derive(Debug, Deserialize)]
struct ApiMeta {
    #[serde(default)]
    billed_units: Option<BilledUnits>,
}

#[derive(Debug, Deserialize)]
struct BilledUnits {
    #[serde(default)]
    input_tokens: f64,
    #[serde(default)]
    output_tokens: f64,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_tokens(units: f64) -> u32 {
    units.max(0.0).min(f64::from(u32::MAX)) as u32
}

/// Cohere takes the last user turn as `message` and everything before it
/// as `chat_history`; the system prompt becomes the `preamble`.
fn to_wire<'a>(request: &'a ChatCompletionRequest, model: &'a str) -> Option<ChatRequest<'a>> {
    let last_user = request
        .messages
        .iter()
        .rposition(|m| m.role == Role::User)?;

    let chat_history = request.messages[..last_user]
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| HistoryMessage {
            role: if m.role == Role::Assistant { "CHATBOT" } else { "USER" },
            message: &m.content,
        })
        .collect();

    Some(ChatRequest {
        model,
        message: &request.messages[last_user].content,
        preamble: request.system_prompt(),
        chat_history,
    })
}

/// Adapter for Cohere.
pub struct CohereAdapter {
    model: String,
    probe_timeout: Duration,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthProvider>,
}

impl CohereAdapter {
    /// Creates an adapter over a reqwest transport.
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        let transport = http_transport(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Creates an adapter over a custom transport.
    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            auth: Arc::new(ApiKeyAuth::bearer(config.api_key().clone())),
            model: config.model,
            probe_timeout: config.probe_timeout,
            transport,
        }
    }
}

#[async_trait]
impl ProviderAdapter for CohereAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Cohere
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self), fields(provider = "cohere"))]
    async fn health_check(&self) -> HealthCheckResult {
        let mut request = HttpRequest::get("v1/models");
        request.headers = self.auth.auth_headers();
        probe(self.id(), self.transport.as_ref(), request, self.probe_timeout).await
    }

    #[instrument(skip(self, request), fields(provider = "cohere"))]
    async fn chat(&self, request: ChatCompletionRequest) -> ProviderResult<ChatCompletion> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = to_wire(&request, model).ok_or_else(|| {
            ProviderError::new(self.id(), ErrorKind::Unknown, "Request has no user message")
        })?;

        let mut http_request = HttpRequest::post("v1/chat")
            .with_json(&body)
            .map_err(|e| ProviderError::new(self.id(), ErrorKind::Unknown, e.to_string()))?;
        http_request.headers.extend(self.auth.auth_headers());
        if let Some(timeout) = request.timeout {
            http_request = http_request.with_timeout(timeout);
        }

        let (response, latency_ms) =
            send_json::<ChatResponse>(self.id(), self.transport.as_ref(), http_request).await?;

        if response.text.is_empty() {
            return Err(empty_completion(self.id()));
        }

        let tokens_used = response
            .meta
            .and_then(|m| m.billed_units)
            .map(|b| TokenUsage::new(whole_tokens(b.input_tokens), whole_tokens(b.output_tokens)))
            .unwrap_or_default();

        Ok(ChatCompletion {
            content: response.text,
            model_used: model.to_string(),
            tokens_used,
            latency_ms,
        })
    }
}

impl std::fmt::Debug for CohereAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohereAdapter")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockResponse, MockTransport};
    use crate::types::chat::ChatMessage;

    fn adapter(transport: Arc<MockTransport>) -> CohereAdapter {
        let config = ProviderConfig::builder(ProviderId::Cohere)
            .api_key("co-test-key")
            .build()
            .unwrap();
        CohereAdapter::with_transport(config, transport)
    }

    #[test]
    fn test_wire_mapping_splits_history() {
        let request = ChatCompletionRequest::new(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
        ]);

        let json = serde_json::to_value(to_wire(&request, "command-r").unwrap()).unwrap();

        assert_eq!(json["message"], "second");
        assert_eq!(json["preamble"], "be brief");
        assert_eq!(json["chat_history"][0]["role"], "USER");
        assert_eq!(json["chat_history"][1]["role"], "CHATBOT");
        assert_eq!(json["chat_history"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_wire_mapping_requires_user_message() {
        let request = ChatCompletionRequest::new(vec![ChatMessage::system("only system")]);
        assert!(to_wire(&request, "command-r").is_none());
    }

    #[tokio::test]
    async fn test_chat_parses_billed_units() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_json(&serde_json::json!({
            "text": "Bonjour",
            "generation_id": "gen-1",
            "meta": {"billed_units": {"input_tokens": 8, "output_tokens": 3}}
        }));
        let adapter = adapter(Arc::clone(&transport));

        let completion = adapter
            .chat(ChatCompletionRequest::new(vec![ChatMessage::user("hello in french")]))
            .await
            .unwrap();

        assert_eq!(completion.content, "Bonjour");
        assert_eq!(completion.tokens_used, TokenUsage::new(8, 3));
        assert_eq!(completion.model_used, "command-r");

        let recorded = transport.last_request().unwrap();
        assert_eq!(recorded.path, "v1/chat");
        assert_eq!(
            recorded.headers.get("Authorization").map(String::as_str),
            Some("Bearer co-test-key")
        );
    }

    #[tokio::test]
    async fn test_chat_service_unavailable() {
        let transport = Arc::new(MockTransport::new());
        transport.queue(MockResponse::error(503, "service unavailable"));
        let adapter = adapter(transport);

        let err = adapter
            .chat(ChatCompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert_eq!(err.status, Some(503));
    }

    #[tokio::test]
    async fn test_health_check_path() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_json(&serde_json::json!({"models": []}));
        let adapter = adapter(Arc::clone(&transport));

        assert!(adapter.health_check().await.healthy);
        assert_eq!(transport.last_request().unwrap().path, "v1/models");
    }
}
