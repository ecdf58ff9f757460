//! Google Gemini adapter (`generateContent`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
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

const API_KEY_HEADER: &str = "x-goog-api-key";

fn generate_content_path(model: &str) -> String {
    format!("models/{model}:generateContent")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

/// Adapter for Google Gemini.
pub struct GeminiAdapter {
    model: String,
    probe_timeout: Duration,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthProvider>,
}

impl GeminiAdapter {
    /// Creates an adapter over a reqwest transport.
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        let transport = http_transport(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Creates an adapter over a custom transport.
    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let key: SecretString = config.api_key().clone();
        Self {
            auth: Arc::new(ApiKeyAuth::header(API_KEY_HEADER, key)),
            model: config.model,
            probe_timeout: config.probe_timeout,
            transport,
        }
    }
}

/// Gemini has no system role in `contents`; the system prompt travels as
/// `systemInstruction` and assistant turns use the `model` role.
fn to_wire(request: &ChatCompletionRequest) -> GenerateContentRequest<'_> {
    let system_instruction = request.system_prompt().map(|text| Content {
        role: None,
        parts: vec![Part { text }],
    });

    let contents = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| Content {
            role: Some(if m.role == Role::Assistant { "model" } else { "user" }),
            parts: vec![Part { text: &m.content }],
        })
        .collect();

    GenerateContentRequest {
        system_instruction,
        contents,
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self), fields(provider = "gemini"))]
    async fn health_check(&self) -> HealthCheckResult {
        let mut request = HttpRequest::get("models");
        request.headers = self.auth.auth_headers();
        probe(self.id(), self.transport.as_ref(), request, self.probe_timeout).await
    }

    #[instrument(skip(self, request), fields(provider = "gemini"))]
    async fn chat(&self, request: ChatCompletionRequest) -> ProviderResult<ChatCompletion> {
        let model = request.model.as_deref().unwrap_or(&self.model);

        let mut http_request = HttpRequest::post(generate_content_path(model))
            .with_json(&to_wire(&request))
            .map_err(|e| ProviderError::new(self.id(), ErrorKind::Unknown, e.to_string()))?;
        http_request.headers.extend(self.auth.auth_headers());
        if let Some(timeout) = request.timeout {
            http_request = http_request.with_timeout(timeout);
        }

        let (response, latency_ms) = send_json::<GenerateContentResponse>(
            self.id(),
            self.transport.as_ref(),
            http_request,
        )
        .await?;

        let content: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(empty_completion(self.id()));
        }

        let tokens_used = response
            .usage_metadata
            .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        Ok(ChatCompletion {
            content,
            model_used: response.model_version.unwrap_or_else(|| model.to_string()),
            tokens_used,
            latency_ms,
        })
    }
}

impl std::fmt::Debug for GeminiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAdapter")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
