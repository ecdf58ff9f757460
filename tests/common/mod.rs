//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use provider_orchestrator::mocks::MockAdapter;
use provider_orchestrator::{OrchestratorConfig, ProviderAdapter, ProviderId, QueryOrchestrator};

/// Policy with short, deterministic backoff waits.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .attempt_delays(Duration::from_millis(10), Duration::from_millis(40))
        .attempt_jitter(false)
}

/// Builds an orchestrator over mock adapters, in the given order.
pub fn orchestrator(adapters: &[Arc<MockAdapter>]) -> QueryOrchestrator {
    orchestrator_with(fast_config(), adapters)
}

/// Builds an orchestrator over mock adapters with a custom policy.
pub fn orchestrator_with(config: OrchestratorConfig, adapters: &[Arc<MockAdapter>]) -> QueryOrchestrator {
    let priority: Vec<ProviderId> = adapters.iter().map(|a| a.id()).collect();
    adapters
        .iter()
        .fold(
            QueryOrchestrator::builder().config(config.priority(priority)),
            |builder, adapter| builder.adapter(Arc::clone(adapter) as Arc<dyn ProviderAdapter>),
        )
        .build()
        .unwrap()
}

/// Shorthand for an adapter that always answers with `content`.
pub fn answering(id: ProviderId, content: &str) -> Arc<MockAdapter> {
    Arc::new(MockAdapter::succeeding(id, content))
}
