//! End-to-end routing behavior of the orchestrator over mock adapters.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{answering, fast_config, orchestrator, orchestrator_with};
use provider_orchestrator::mocks::MockAdapter;
use provider_orchestrator::{
    ChatType, ErrorKind, OrchestratorError, ProviderId, ProviderUsed, QueryRequest,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_falls_back_through_priority_order() {
    let groq = Arc::new(MockAdapter::failing(ProviderId::Groq, ErrorKind::AuthFailed));
    let cerebras = Arc::new(MockAdapter::failing(ProviderId::Cerebras, ErrorKind::Unknown));
    let mistral = answering(ProviderId::Mistral, "third time lucky");
    let orchestrator = orchestrator(&[groq.clone(), cerebras.clone(), mistral.clone()]);

    let response = orchestrator
        .handle(&QueryRequest::new("u1", "hello"))
        .await
        .unwrap();

    assert_eq!(response.provider_used, ProviderUsed::Provider(ProviderId::Mistral));
    assert!(response.fallback_used);
    assert_eq!(response.content, "third time lucky");

    let tried: Vec<ProviderId> = response.attempts.iter().map(|a| a.provider).collect();
    assert_eq!(tried, vec![ProviderId::Groq, ProviderId::Cerebras, ProviderId::Mistral]);
    assert_eq!(response.attempts[0].error_kind, Some(ErrorKind::AuthFailed));
    assert_eq!(groq.call_count(), 1);
    assert_eq!(cerebras.call_count(), 1);
}

#[tokio::test]
async fn test_preferred_provider_failure_is_not_retried_later() {
    let groq = answering(ProviderId::Groq, "groq");
    let gemini = Arc::new(MockAdapter::failing(ProviderId::Gemini, ErrorKind::AuthFailed));
    let orchestrator = orchestrator(&[groq.clone(), gemini.clone()]);

    let request = QueryRequest::new("u1", "hello").preferred_provider("gemini");
    let response = orchestrator.handle(&request).await.unwrap();

    assert_eq!(response.provider_used, ProviderUsed::Provider(ProviderId::Groq));
    assert!(response.fallback_used);
    assert_eq!(gemini.call_count(), 1);
    assert_eq!(response.attempts.len(), 2);
    assert_eq!(response.attempts[0].provider, ProviderId::Gemini);
}

#[tokio::test]
async fn test_unhealthy_preferred_keeps_priority_slot() {
    let groq = answering(ProviderId::Groq, "groq");
    let gemini = answering(ProviderId::Gemini, "gemini");
    gemini.set_healthy(false);
    let orchestrator = orchestrator(&[groq.clone(), gemini.clone()]);
    orchestrator.registry().probe_all().await;

    let request = QueryRequest::new("u1", "hello").preferred_provider("gemini");
    let response = orchestrator.handle(&request).await.unwrap();

    assert_eq!(response.provider_used, ProviderUsed::Provider(ProviderId::Groq));
    assert!(response.fallback_used);
    assert_eq!(gemini.call_count(), 0);
}

#[tokio::test]
async fn test_rate_limit_retries_then_recovers() {
    let groq = answering(ProviderId::Groq, "after the storm");
    groq.push_err(ErrorKind::RateLimited);
    groq.push_err(ErrorKind::Timeout);
    let orchestrator = orchestrator(&[groq.clone()]);

    let response = orchestrator
        .handle(&QueryRequest::new("u1", "hello"))
        .await
        .unwrap();

    assert_eq!(response.content, "after the storm");
    assert!(!response.fallback_used);
    assert_eq!(response.attempts[0].attempts, 3);
    assert_eq!(groq.call_count(), 3);
}

#[tokio::test]
async fn test_everything_down_degrades_without_error() {
    let groq = Arc::new(MockAdapter::failing(ProviderId::Groq, ErrorKind::Unavailable));
    let cohere = Arc::new(MockAdapter::failing(ProviderId::Cohere, ErrorKind::RateLimited));
    let orchestrator = orchestrator(&[groq.clone(), cohere.clone()]);

    let request = QueryRequest::new("u1", "Why is the sky blue?").chat_type(ChatType::Research);
    let response = orchestrator.handle(&request).await.unwrap();

    assert!(response.is_degraded());
    assert_eq!(response.provider_used.as_str(), "system");
    assert!(response.fallback_used);
    assert!(response.content.contains("Why is the sky blue?"));
    assert_eq!(response.query_type, "research");
    assert_eq!(response.tokens_used.total(), 0);

    let retries = fast_config().attempt_retries;
    assert_eq!(groq.call_count(), retries as usize + 1);
    assert_eq!(cohere.call_count(), retries as usize + 1);

    // Degraded answers are never cached.
    orchestrator.handle(&request).await.unwrap();
    assert_eq!(groq.call_count(), 2 * (retries as usize + 1));

    let metrics = orchestrator.metrics();
    assert_eq!(metrics.degraded, 2);
    assert_eq!(metrics.cache_hits, 0);
}

#[tokio::test]
async fn test_cache_serves_repeat_questions() {
    let groq = answering(ProviderId::Groq, "42");
    let orchestrator = orchestrator(&[groq.clone()]);

    let first = orchestrator
        .handle(&QueryRequest::new("u1", "The answer?").conversation_id("a"))
        .await
        .unwrap();
    let second = orchestrator
        .handle(&QueryRequest::new("u1", "  the   ANSWER? ").conversation_id("b"))
        .await
        .unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.content, "42");
    assert_eq!(second.conversation_id, "b");
    assert!(second.attempts.is_empty());
    assert_eq!(groq.call_count(), 1);

    // Other users never see the entry.
    let other = orchestrator
        .handle(&QueryRequest::new("u2", "The answer?"))
        .await
        .unwrap();
    assert!(!other.cached);
    assert_eq!(groq.call_count(), 2);
}

#[tokio::test]
async fn test_unknown_preferred_provider_rejected() {
    let groq = answering(ProviderId::Groq, "unused");
    let orchestrator = orchestrator(&[groq.clone()]);

    let request = QueryRequest::new("u1", "hello").preferred_provider("skynet");
    let error = orchestrator.handle(&request).await.unwrap_err();

    match error {
        OrchestratorError::InvalidRequest { field, .. } => {
            assert_eq!(field.as_deref(), Some("preferredProvider"));
        }
        OrchestratorError::Cancelled => panic!("expected InvalidRequest"),
    }
    assert_eq!(groq.call_count(), 0);
}

#[tokio::test]
async fn test_oversized_message_rejected() {
    let groq = answering(ProviderId::Groq, "unused");
    let orchestrator = orchestrator_with(fast_config().max_message_chars(10), &[groq.clone()]);

    let result = orchestrator
        .handle(&QueryRequest::new("u1", "far too long for the limit"))
        .await;

    assert!(matches!(result, Err(OrchestratorError::InvalidRequest { .. })));
    assert_eq!(groq.call_count(), 0);
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_everything() {
    let groq = Arc::new(MockAdapter::failing(ProviderId::Groq, ErrorKind::Unavailable));
    let gemini = answering(ProviderId::Gemini, "never reached");
    let config = fast_config().attempt_delays(Duration::from_secs(30), Duration::from_secs(30));
    let orchestrator = Arc::new(orchestrator_with(config, &[groq.clone(), gemini.clone()]));

    let cancel = CancellationToken::new();
    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orchestrator
                .handle_with_cancel(&QueryRequest::new("u1", "hello"), &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    assert_eq!(groq.call_count(), 1);
    assert_eq!(gemini.call_count(), 0);
}

#[tokio::test]
async fn test_outcomes_feed_health_records() {
    let groq = Arc::new(MockAdapter::failing(ProviderId::Groq, ErrorKind::AuthFailed));
    let gemini = answering(ProviderId::Gemini, "ok");
    let orchestrator = orchestrator(&[groq.clone(), gemini.clone()]);

    orchestrator
        .handle(&QueryRequest::new("u1", "hello"))
        .await
        .unwrap();

    let groq_health = orchestrator.registry().health(ProviderId::Groq).unwrap();
    assert!(!groq_health.healthy);
    assert_eq!(groq_health.consecutive_failures, 1);
    assert!(groq_health.last_error.is_some());

    let gemini_health = orchestrator.registry().health(ProviderId::Gemini).unwrap();
    assert!(gemini_health.healthy);
    assert!(gemini_health.last_checked_at.is_some());

    let metrics = orchestrator.metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.fallbacks, 1);
    assert_eq!(metrics.provider(ProviderId::Groq).failures, 1);
    assert_eq!(metrics.provider(ProviderId::Gemini).successes, 1);
}

#[tokio::test]
async fn test_concurrent_requests_are_independent() {
    let groq = Arc::new(
        MockAdapter::succeeding(ProviderId::Groq, "ok").with_delay(Duration::from_millis(20)),
    );
    let orchestrator = Arc::new(orchestrator(&[groq.clone()]));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .handle(&QueryRequest::new(format!("user-{i}"), "hello"))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.provider_used, ProviderUsed::Provider(ProviderId::Groq));
    }
    assert_eq!(groq.call_count(), 8);
}
