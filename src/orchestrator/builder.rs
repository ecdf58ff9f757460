//! Builder for [`QueryOrchestrator`].

use std::sync::Arc;

use crate::config::{OrchestratorConfig, ProviderConfig};
use crate::errors::ConfigError;
use crate::observability::{DefaultMetricsCollector, MetricsCollector};
use crate::providers::{build_adapter, ProviderAdapter};
use crate::registry::ProviderRegistry;
use crate::types::query::ProviderId;

use super::cache::ResponseCache;
use super::QueryOrchestrator;

/// Builder for [`QueryOrchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    providers: Vec<ProviderConfig>,
    registry: Option<Arc<ProviderRegistry>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
}

impl OrchestratorBuilder {
    /// Creates a builder with the default policy and no providers.
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            adapters: Vec::new(),
            providers: Vec::new(),
            registry: None,
            metrics: None,
        }
    }

    /// Sets the routing policy.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a ready-made adapter.
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Adds a provider to be reached over HTTP.
    pub fn provider(mut self, config: ProviderConfig) -> Self {
        self.providers.push(config);
        self
    }

    /// Uses an existing registry instead of building one.
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Reads the policy and every provider whose API key is set.
    ///
    /// Providers without `<PROVIDER>_API_KEY` are skipped; any other
    /// configuration problem is an error.
    pub fn from_env(mut self) -> Result<Self, ConfigError> {
        self.config = OrchestratorConfig::from_env()?;

        for id in self.config.priority.clone() {
            match ProviderConfig::from_env(id) {
                Ok(config) => self.providers.push(config),
                Err(ConfigError::Missing { .. }) => {
                    tracing::debug!(provider = %id, "Provider not configured, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(self)
    }

    /// Builds the orchestrator.
    pub fn build(self) -> Result<QueryOrchestrator, ConfigError> {
        self.config.validate()?;

        let registry = match self.registry {
            Some(registry) => {
                if !self.adapters.is_empty() || !self.providers.is_empty() {
                    return Err(ConfigError::invalid(
                        "registry",
                        "Adapters cannot be added to an existing registry",
                    ));
                }
                registry
            }
            None => {
                let mut adapters = self.adapters;
                for provider in self.providers {
                    adapters.push(build_adapter(provider)?);
                }
                sort_by_priority(&mut adapters, &self.config.priority);
                Arc::new(ProviderRegistry::new(adapters))
            }
        };

        if registry.is_empty() {
            tracing::warn!("No providers configured; every request will be answered offline");
        }

        Ok(QueryOrchestrator {
            cache: ResponseCache::new(self.config.cache_ttl, self.config.cache_capacity),
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(DefaultMetricsCollector::new())),
            config: self.config,
            registry,
        })
    }
}

/// Orders adapters by the configured priority; unlisted providers keep
/// their relative order after the listed ones.
fn sort_by_priority(adapters: &mut [Arc<dyn ProviderAdapter>], priority: &[ProviderId]) {
    adapters.sort_by_key(|adapter| {
        priority
            .iter()
            .position(|id| *id == adapter.id())
            .unwrap_or(usize::MAX)
    });
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("adapters", &self.adapters.len())
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}
