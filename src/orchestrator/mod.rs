//! Query orchestration.
//!
//! A request moves through a small state machine:
//!
//! ```text
//! Selecting -> Attempting(p) -> Succeeded
//!                            -> Retrying(p)    (backoff, same provider)
//!                            -> Advancing(next)
//!                            -> Exhausted      (degraded response)
//! ```
//!
//! Retries never cross providers and each provider is tried at most once per
//! request. Exhaustion is not an error: the caller receives an offline
//! response labelled with the `system` provider.

mod builder;
pub mod cache;

pub use builder::OrchestratorBuilder;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::errors::{OrchestratorError, OrchestratorResult, ProviderError};
use crate::observability::{elapsed_ms, MetricsCollector, OrchestratorMetrics};
use crate::providers::ProviderAdapter;
use crate::registry::ProviderRegistry;
use crate::resilience::{BackoffError, BackoffExecutor, Deadline};
use crate::types::chat::{ChatCompletion, ChatCompletionRequest, ChatMessage};
use crate::types::query::{ProviderId, QueryRequest};
use crate::types::response::{AttemptOutcome, NormalizedResponse, ProviderUsed, TokenUsage};

use cache::{cache_key, ResponseCache};

/// Model name reported by degraded responses.
pub const OFFLINE_MODEL: &str = "offline";

/// Anything that can answer a query.
///
/// Implemented by [`QueryOrchestrator`] and by the
/// [`ChatPipeline`](crate::service::ChatPipeline) wrapped around it; the
/// streaming framer works against this trait.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Answers one query.
    async fn handle_query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> OrchestratorResult<NormalizedResponse>;
}

enum AttemptError {
    Failed(AttemptOutcome),
    Cancelled,
}

/// Routes queries across providers with retry, fallback and degradation.
pub struct QueryOrchestrator {
    config: OrchestratorConfig,
    registry: Arc<ProviderRegistry>,
    cache: ResponseCache,
    metrics: Arc<dyn MetricsCollector>,
}

impl QueryOrchestrator {
    /// Creates a builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Routing policy.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Provider registry.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Current metrics.
    pub fn metrics(&self) -> OrchestratorMetrics {
        self.metrics.snapshot()
    }

    /// Starts background health probing at the configured interval.
    pub async fn start_health_checks(&self) {
        self.registry.start(self.config.health_interval).await;
    }

    /// Stops background health probing.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    /// Answers a query that cannot be cancelled by the caller.
    pub async fn handle(&self, request: &QueryRequest) -> OrchestratorResult<NormalizedResponse> {
        self.handle_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Answers a query.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidRequest`] before any provider is
    /// contacted, or [`OrchestratorError::Cancelled`] when `cancel` fires or
    /// the request budget runs out. Provider failures never surface here.
    #[instrument(
        skip(self, request, cancel),
        fields(user_id = %request.user_id, chat_type = %request.chat_type)
    )]
    pub async fn handle_with_cancel(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<NormalizedResponse> {
        let started = Instant::now();
        let preferred = request.validate(self.config.max_message_chars)?;

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let prompt = request.prompt();
        let key = cache_key(&request.user_id, request.chat_type, &prompt);

        if let Some(mut hit) = self.cache.get(&key) {
            hit.cached = true;
            hit.conversation_id = conversation_id;
            hit.attempts.clear();
            hit.latency_ms = elapsed_ms(started);

            self.metrics.record_cache_hit();
            self.metrics.record_request(hit.latency_ms);
            tracing::debug!(provider = %hit.provider_used, "Served from cache");
            return Ok(hit);
        }

        let deadline = Deadline::new(cancel, self.config.request_timeout);
        let candidates = self.registry.select_candidates(preferred);
        let first_choice = preferred.or_else(|| candidates.first().copied());
        tracing::debug!(?candidates, ?preferred, "Selecting");

        let mut chat_request = ChatCompletionRequest::new(vec![
            ChatMessage::system(request.chat_type.system_prompt()),
            ChatMessage::user(prompt),
        ]);
        if let Some(timeout) = self.config.attempt_timeout {
            chat_request = chat_request.timeout(timeout);
        }

        let mut attempts = Vec::with_capacity(candidates.len());

        for provider in candidates {
            if deadline.is_expired() {
                tracing::info!(provider = %provider, "Cancelled before attempt");
                return Err(OrchestratorError::Cancelled);
            }

            let Some(adapter) = self.registry.adapter(provider) else {
                continue;
            };

            tracing::debug!(provider = %provider, "Attempting");
            match self
                .attempt(adapter.as_ref(), &chat_request, deadline.token())
                .await
            {
                Ok((completion, outcome)) => {
                    self.registry.record_outcome(provider, &outcome);
                    self.metrics
                        .record_attempt(provider, true, outcome.latency_ms);
                    attempts.push(outcome);

                    let fallback_used = first_choice != Some(provider);
                    let response = NormalizedResponse {
                        content: completion.content,
                        conversation_id,
                        provider_used: ProviderUsed::Provider(provider),
                        model_used: completion.model_used,
                        tokens_used: completion.tokens_used,
                        latency_ms: elapsed_ms(started),
                        fallback_used,
                        cached: false,
                        query_type: request.chat_type.as_str().to_string(),
                        attempts,
                    };

                    if fallback_used {
                        self.metrics.record_fallback();
                    }
                    self.metrics.record_tokens(
                        response.tokens_used.input,
                        response.tokens_used.output,
                    );
                    self.metrics.record_request(response.latency_ms);
                    self.cache.insert(key, response.clone());

                    tracing::info!(
                        provider = %provider,
                        fallback_used,
                        latency_ms = response.latency_ms,
                        "Succeeded"
                    );
                    return Ok(response);
                }
                Err(AttemptError::Failed(outcome)) => {
                    self.registry.record_outcome(provider, &outcome);
                    self.metrics
                        .record_attempt(provider, false, outcome.latency_ms);
                    tracing::warn!(
                        provider = %provider,
                        attempts = outcome.attempts,
                        error_kind = ?outcome.error_kind,
                        "Advancing to next provider"
                    );
                    attempts.push(outcome);
                }
                Err(AttemptError::Cancelled) => {
                    tracing::info!(provider = %provider, "Cancelled during attempt");
                    return Err(OrchestratorError::Cancelled);
                }
            }
        }

        let response = degraded_response(request, conversation_id, attempts, elapsed_ms(started));
        self.metrics.record_degraded();
        self.metrics.record_request(response.latency_ms);
        tracing::warn!(
            tried = response.attempts.len(),
            "Exhausted all providers, answering offline"
        );
        Ok(response)
    }

    /// Runs one provider under the per-provider backoff policy.
    async fn attempt(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ChatCompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<(ChatCompletion, AttemptOutcome), AttemptError> {
        let provider = adapter.id();
        let started = Instant::now();
        let options = self
            .config
            .attempt_backoff()
            .cancellation(cancel.clone());
        let mut calls: u32 = 0;

        let result = BackoffExecutor::run_with_hint(
            || {
                calls += 1;
                adapter.chat(request.clone())
            },
            &options,
            ProviderError::is_retryable,
            |error: &ProviderError| error.retry_after,
        )
        .await;

        match result {
            Ok(completion) => {
                let outcome = AttemptOutcome::success(provider, elapsed_ms(started), calls);
                Ok((completion, outcome))
            }
            Err(BackoffError::Cancelled) => Err(AttemptError::Cancelled),
            Err(BackoffError::Operation(error)) => Err(AttemptError::Failed(failed_outcome(
                provider,
                elapsed_ms(started),
                calls,
                &error,
            ))),
        }
    }
}

fn failed_outcome(
    provider: ProviderId,
    latency_ms: u64,
    calls: u32,
    error: &ProviderError,
) -> AttemptOutcome {
    AttemptOutcome::failure(provider, latency_ms, calls, error.kind, error.to_string())
}

/// The guaranteed answer once every provider failed.
fn degraded_response(
    request: &QueryRequest,
    conversation_id: String,
    attempts: Vec<AttemptOutcome>,
    latency_ms: u64,
) -> NormalizedResponse {
    let content = format!(
        "I'm currently offline and could not reach any AI provider, so I can't give a full \
         answer right now. Your message was: \"{}\". Please try again in a few moments.",
        request.message.trim()
    );

    NormalizedResponse {
        content,
        conversation_id,
        provider_used: ProviderUsed::System,
        model_used: OFFLINE_MODEL.to_string(),
        tokens_used: TokenUsage::default(),
        latency_ms,
        fallback_used: true,
        cached: false,
        query_type: request.chat_type.as_str().to_string(),
        attempts,
    }
}

#[async_trait]
impl QueryHandler for QueryOrchestrator {
    async fn handle_query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> OrchestratorResult<NormalizedResponse> {
        self.handle_with_cancel(&request, &cancel).await
    }
}

impl std::fmt::Debug for QueryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOrchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::mocks::MockAdapter;
    use crate::types::chat::Role;
    use crate::types::query::ChatType;
    use std::time::Duration;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig::default()
            .attempt_delays(Duration::from_millis(10), Duration::from_millis(40))
            .attempt_jitter(false)
    }

    fn orchestrator(adapters: &[Arc<MockAdapter>]) -> QueryOrchestrator {
        adapters
            .iter()
            .fold(QueryOrchestrator::builder().config(fast_config()), |b, a| {
                b.adapter(Arc::clone(a) as Arc<dyn ProviderAdapter>)
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_candidate_answers() {
        let groq = Arc::new(MockAdapter::succeeding(ProviderId::Groq, "from groq"));
        let gemini = Arc::new(MockAdapter::new(ProviderId::Gemini));
        let orchestrator = orchestrator(&[Arc::clone(&groq), Arc::clone(&gemini)]);

        let response = orchestrator
            .handle(&QueryRequest::new("u1", "hello"))
            .await
            .unwrap();

        assert_eq!(response.content, "from groq");
        assert_eq!(response.provider_used, ProviderUsed::Provider(ProviderId::Groq));
        assert!(!response.fallback_used);
        assert!(!response.cached);
        assert_eq!(response.query_type, "general");
        assert_eq!(response.attempts.len(), 1);
        assert_eq!(gemini.call_count(), 0);
    }

    #[tokio::test]
    async fn test_prompt_carries_system_instruction() {
        let groq = Arc::new(MockAdapter::new(ProviderId::Groq));
        let orchestrator = orchestrator(&[Arc::clone(&groq)]);

        orchestrator
            .handle(
                &QueryRequest::new("u1", "what is rust?")
                    .chat_type(ChatType::CodeAssistant)
                    .context("User knows C."),
            )
            .await
            .unwrap();

        let requests = groq.requests();
        let request = &requests[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(
            request.messages[0].content,
            ChatType::CodeAssistant.system_prompt()
        );
        assert_eq!(request.messages[1].content, "User knows C.\n\nwhat is rust?");
    }

    #[tokio::test]
    async fn test_preferred_provider_goes_first() {
        let groq = Arc::new(MockAdapter::new(ProviderId::Groq));
        let cohere = Arc::new(MockAdapter::new(ProviderId::Cohere));
        let orchestrator = orchestrator(&[Arc::clone(&groq), Arc::clone(&cohere)]);

        let response = orchestrator
            .handle(&QueryRequest::new("u1", "hi").preferred_provider("cohere"))
            .await
            .unwrap();

        assert_eq!(response.provider_used, ProviderUsed::Provider(ProviderId::Cohere));
        assert!(!response.fallback_used);
        assert_eq!(groq.call_count(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_advances_without_retry() {
        let groq = Arc::new(MockAdapter::failing(ProviderId::Groq, ErrorKind::AuthFailed));
        let mistral = Arc::new(MockAdapter::new(ProviderId::Mistral));
        let orchestrator = orchestrator(&[Arc::clone(&groq), Arc::clone(&mistral)]);

        let response = orchestrator
            .handle(&QueryRequest::new("u1", "hi").preferred_provider("groq"))
            .await
            .unwrap();

        assert_eq!(groq.call_count(), 1);
        assert_eq!(mistral.call_count(), 1);
        assert_eq!(response.provider_used, ProviderUsed::Provider(ProviderId::Mistral));
        assert!(response.fallback_used);
        assert_eq!(response.attempts[0].error_kind, Some(ErrorKind::AuthFailed));
        assert!(!orchestrator.registry().health(ProviderId::Groq).unwrap().healthy);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_same_provider() {
        let groq = Arc::new(MockAdapter::new(ProviderId::Groq));
        groq.push_err(ErrorKind::RateLimited);
        groq.push_err(ErrorKind::Timeout);
        let gemini = Arc::new(MockAdapter::new(ProviderId::Gemini));
        let orchestrator = orchestrator(&[Arc::clone(&groq), Arc::clone(&gemini)]);

        let response = orchestrator
            .handle(&QueryRequest::new("u1", "hi"))
            .await
            .unwrap();

        assert_eq!(response.provider_used, ProviderUsed::Provider(ProviderId::Groq));
        assert_eq!(response.attempts[0].attempts, 3);
        assert_eq!(gemini.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_retry_after() {
        let groq = Arc::new(MockAdapter::new(ProviderId::Groq));
        groq.push_error(
            ProviderError::new(ProviderId::Groq, ErrorKind::RateLimited, "slow down")
                .with_retry_after(Some(Duration::from_millis(35))),
        );
        let orchestrator = orchestrator(&[Arc::clone(&groq)]);

        let started = tokio::time::Instant::now();
        let response = orchestrator
            .handle(&QueryRequest::new("u1", "hi"))
            .await
            .unwrap();

        assert_eq!(response.provider_used, ProviderUsed::Provider(ProviderId::Groq));
        assert_eq!(response.attempts[0].attempts, 2);
        assert!(started.elapsed() >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn test_exhaustion_degrades() {
        let groq = Arc::new(MockAdapter::failing(ProviderId::Groq, ErrorKind::Unavailable));
        let cohere = Arc::new(MockAdapter::failing(ProviderId::Cohere, ErrorKind::Unknown));
        let orchestrator = orchestrator(&[Arc::clone(&groq), Arc::clone(&cohere)]);

        let response = orchestrator
            .handle(&QueryRequest::new("u1", "Explain tides"))
            .await
            .unwrap();

        assert!(response.is_degraded());
        assert_eq!(response.provider_used, ProviderUsed::System);
        assert_eq!(response.model_used, OFFLINE_MODEL);
        assert!(response.fallback_used);
        assert!(!response.cached);
        assert_eq!(response.tokens_used, TokenUsage::default());
        assert!(response.content.contains("Explain tides"));
        assert_eq!(groq.call_count(), 3);
        assert_eq!(cohere.call_count(), 1);
        assert_eq!(response.attempts.len(), 2);

        let metrics = orchestrator.metrics();
        assert_eq!(metrics.degraded, 1);
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_no_providers_degrades() {
        let orchestrator = orchestrator(&[]);
        let response = orchestrator
            .handle(&QueryRequest::new("u1", "anyone?"))
            .await
            .unwrap();

        assert!(response.is_degraded());
        assert!(response.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_contacts_nobody() {
        let groq = Arc::new(MockAdapter::new(ProviderId::Groq));
        let orchestrator = orchestrator(&[Arc::clone(&groq)]);

        let err = orchestrator
            .handle(&QueryRequest::new("u1", "hi").preferred_provider("skynet"))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::InvalidRequest { .. }));
        assert_eq!(groq.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_providers() {
        let groq = Arc::new(MockAdapter::new(ProviderId::Groq));
        let orchestrator = orchestrator(&[Arc::clone(&groq)]);

        let first = orchestrator
            .handle(&QueryRequest::new("u1", "Hello  World"))
            .await
            .unwrap();
        let second = orchestrator
            .handle(&QueryRequest::new("u1", " hello world ").conversation_id("c-2"))
            .await
            .unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.content, first.content);
        assert_eq!(second.conversation_id, "c-2");
        assert!(second.attempts.is_empty());
        assert_eq!(groq.call_count(), 1);
        assert_eq!(orchestrator.metrics().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let groq = Arc::new(MockAdapter::new(ProviderId::Groq));
        let orchestrator = orchestrator(&[Arc::clone(&groq)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .handle_with_cancel(&QueryRequest::new("u1", "hi"), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, OrchestratorError::Cancelled);
        assert_eq!(groq.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_cancels() {
        let slow = Arc::new(
            MockAdapter::new(ProviderId::Groq).with_delay(Duration::from_secs(30)),
        );
        let backup = Arc::new(MockAdapter::new(ProviderId::Gemini));
        let orchestrator = QueryOrchestrator::builder()
            .config(fast_config().request_timeout(Duration::from_secs(1)))
            .adapter(Arc::clone(&slow) as Arc<dyn ProviderAdapter>)
            .adapter(Arc::clone(&backup) as Arc<dyn ProviderAdapter>)
            .build()
            .unwrap();

        let err = orchestrator
            .handle(&QueryRequest::new("u1", "hi"))
            .await
            .unwrap_err();

        assert_eq!(err, OrchestratorError::Cancelled);
        assert_eq!(backup.call_count(), 0);
    }

    #[tokio::test]
    async fn test_conversation_id_generated_when_absent() {
        let orchestrator = orchestrator(&[Arc::new(MockAdapter::new(ProviderId::Groq))]);

        let response = orchestrator
            .handle(&QueryRequest::new("u1", "hi"))
            .await
            .unwrap();

        assert!(Uuid::parse_str(&response.conversation_id).is_ok());
    }
}
