//! Provider registry and selector.
//!
//! The registry owns the configured adapters, in priority order, plus one
//! [`HealthRecord`] per provider. Health is advisory: it decides who goes
//! first, never who is tried. Records are fed by live attempt outcomes and by
//! probes, either on demand or from a background task started with
//! [`ProviderRegistry::start`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::providers::{HealthCheckResult, ProviderAdapter};
use crate::types::query::ProviderId;
use crate::types::response::AttemptOutcome;

/// Last known health of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    /// Whether the last observation succeeded.
    pub healthy: bool,
    /// When the provider was last observed, if ever.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Latency of the last observation.
    pub last_response_time_ms: Option<u64>,
    /// Redacted description of the last failure.
    pub last_error: Option<String>,
    /// Failures observed since the last success.
    pub consecutive_failures: u32,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            healthy: true,
            last_checked_at: None,
            last_response_time_ms: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

impl HealthRecord {
    fn observe(&self, healthy: bool, response_time_ms: u64, error: Option<String>) -> Self {
        Self {
            healthy,
            last_checked_at: Some(Utc::now()),
            last_response_time_ms: Some(response_time_ms),
            last_error: if healthy { None } else { error },
            consecutive_failures: if healthy {
                0
            } else {
                self.consecutive_failures.saturating_add(1)
            },
        }
    }
}

struct Entry {
    adapter: Arc<dyn ProviderAdapter>,
    health: RwLock<HealthRecord>,
}

impl Entry {
    fn health(&self) -> HealthRecord {
        match self.health.read() {
            Ok(record) => record.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, healthy: bool, response_time_ms: u64, error: Option<String>) {
        let mut record = match self.health.write() {
            Ok(record) => record,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = record.observe(healthy, response_time_ms, error);
        *record = next;
    }
}

struct Monitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Holds adapters and their health, and orders candidates.
pub struct ProviderRegistry {
    order: Vec<ProviderId>,
    entries: HashMap<ProviderId, Entry>,
    monitor: Mutex<Option<Monitor>>,
}

impl ProviderRegistry {
    /// Creates a registry from adapters listed in priority order.
    ///
    /// A provider listed twice keeps its first position and first adapter.
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        let mut order = Vec::with_capacity(adapters.len());
        let mut entries = HashMap::with_capacity(adapters.len());

        for adapter in adapters {
            let id = adapter.id();
            if entries.contains_key(&id) {
                tracing::warn!(provider = %id, "Duplicate adapter ignored");
                continue;
            }
            order.push(id);
            entries.insert(
                id,
                Entry {
                    adapter,
                    health: RwLock::new(HealthRecord::default()),
                },
            );
        }

        Self {
            order,
            entries,
            monitor: Mutex::new(None),
        }
    }

    /// Configured providers in priority order.
    pub fn providers(&self) -> &[ProviderId] {
        &self.order
    }

    /// Returns true when no adapter is configured.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Adapter handle for a provider.
    pub fn adapter(&self, id: ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.entries.get(&id).map(|e| Arc::clone(&e.adapter))
    }

    /// Current health of a provider.
    pub fn health(&self, id: ProviderId) -> Option<HealthRecord> {
        self.entries.get(&id).map(Entry::health)
    }

    /// Copy of every health record, in priority order.
    pub fn health_snapshot(&self) -> Vec<(ProviderId, HealthRecord)> {
        self.order
            .iter()
            .filter_map(|id| self.health(*id).map(|record| (*id, record)))
            .collect()
    }

    /// Trial order for a request.
    ///
    /// A configured, healthy `preferred` provider goes first. Every other
    /// configured provider follows in priority order whatever its health;
    /// an unhealthy preferred provider keeps its priority slot.
    pub fn select_candidates(&self, preferred: Option<ProviderId>) -> Vec<ProviderId> {
        let promoted = preferred.filter(|id| self.health(*id).is_some_and(|record| record.healthy));

        match promoted {
            Some(first) => std::iter::once(first)
                .chain(self.order.iter().copied().filter(|id| *id != first))
                .collect(),
            None => self.order.clone(),
        }
    }

    /// Folds a real attempt outcome into the provider's health.
    pub fn record_outcome(&self, provider: ProviderId, outcome: &AttemptOutcome) {
        if let Some(entry) = self.entries.get(&provider) {
            entry.update(outcome.succeeded, outcome.latency_ms, outcome.error.clone());
        }
    }

    /// Probes one provider and stores the result.
    #[instrument(skip(self))]
    pub async fn probe(&self, provider: ProviderId) -> Option<HealthCheckResult> {
        let entry = self.entries.get(&provider)?;
        let result = entry.adapter.health_check().await;

        if result.healthy {
            tracing::debug!(
                provider = %provider,
                response_time_ms = result.response_time_ms,
                "Health probe succeeded"
            );
        } else {
            tracing::warn!(
                provider = %provider,
                error = result.error.as_deref().unwrap_or_default(),
                "Health probe failed"
            );
        }

        entry.update(result.healthy, result.response_time_ms, result.error.clone());
        Some(result)
    }

    /// Probes every provider, one after another, in priority order.
    pub async fn probe_all(&self) -> Vec<(ProviderId, HealthCheckResult)> {
        let mut results = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(result) = self.probe(*id).await {
                results.push((*id, result));
            }
        }
        results
    }

    /// Starts background probing every `interval`.
    ///
    /// The task holds only a weak reference and ends on its own once the
    /// registry is dropped. Starting twice restarts the task.
    pub async fn start(self: &Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            tracing::warn!("Health monitor not started: interval must be positive");
            return;
        }

        let token = CancellationToken::new();
        let weak: Weak<Self> = Arc::downgrade(self);
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(registry) = weak.upgrade() else {
                    break;
                };

                tokio::select! {
                    biased;
                    () = task_token.cancelled() => break,
                    _ = registry.probe_all() => {}
                }
            }

            tracing::debug!("Health monitor stopped");
        });

        let previous = self.monitor.lock().await.replace(Monitor { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
            let _ = previous.handle.await;
        }

        tracing::info!(interval_ms = interval.as_millis(), "Health monitor started");
    }

    /// Stops background probing and waits for the task to finish.
    pub async fn shutdown(&self) {
        let monitor = self.monitor.lock().await.take();
        if let Some(monitor) = monitor {
            monitor.token.cancel();
            let _ = monitor.handle.await;
        }
    }

    /// Returns true while background probing runs.
    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|m| !m.handle.is_finished())
    }
}

impl Drop for ProviderRegistry {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.token.cancel();
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.order)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::mocks::MockAdapter;

    fn registry(ids: &[ProviderId]) -> (ProviderRegistry, Vec<Arc<MockAdapter>>) {
        let mocks: Vec<Arc<MockAdapter>> =
            ids.iter().map(|id| Arc::new(MockAdapter::new(*id))).collect();
        let adapters = mocks
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn ProviderAdapter>)
            .collect();
        (ProviderRegistry::new(adapters), mocks)
    }

    fn failure(provider: ProviderId) -> AttemptOutcome {
        AttemptOutcome::failure(provider, 40, 3, ErrorKind::Unavailable, "down")
    }

    #[test]
    fn test_new_providers_start_healthy() {
        let (registry, _) = registry(&[ProviderId::Groq, ProviderId::Gemini]);

        let snapshot = registry.health_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|(_, record)| record.healthy));
        assert!(snapshot[0].1.last_checked_at.is_none());
    }

    #[test]
    fn test_select_without_preference_is_priority_order() {
        let ids = [ProviderId::Groq, ProviderId::Mistral, ProviderId::Cohere];
        let (registry, _) = registry(&ids);

        assert_eq!(registry.select_candidates(None), ids.to_vec());
    }

    #[test]
    fn test_select_promotes_healthy_preferred() {
        let (registry, _) = registry(&[ProviderId::Groq, ProviderId::Mistral, ProviderId::Cohere]);

        assert_eq!(
            registry.select_candidates(Some(ProviderId::Cohere)),
            vec![ProviderId::Cohere, ProviderId::Groq, ProviderId::Mistral]
        );
    }

    #[test]
    fn test_unhealthy_preferred_keeps_its_slot() {
        let (registry, _) = registry(&[ProviderId::Groq, ProviderId::Mistral, ProviderId::Cohere]);
        registry.record_outcome(ProviderId::Cohere, &failure(ProviderId::Cohere));

        assert_eq!(
            registry.select_candidates(Some(ProviderId::Cohere)),
            vec![ProviderId::Groq, ProviderId::Mistral, ProviderId::Cohere]
        );
    }

    #[test]
    fn test_unhealthy_providers_are_never_excluded() {
        let (registry, _) = registry(&[ProviderId::Groq, ProviderId::Mistral]);
        registry.record_outcome(ProviderId::Groq, &failure(ProviderId::Groq));
        registry.record_outcome(ProviderId::Mistral, &failure(ProviderId::Mistral));

        assert_eq!(registry.select_candidates(None).len(), 2);
    }

    #[test]
    fn test_unconfigured_preferred_is_ignored() {
        let (registry, _) = registry(&[ProviderId::Groq]);
        assert_eq!(
            registry.select_candidates(Some(ProviderId::Gemini)),
            vec![ProviderId::Groq]
        );
    }

    #[test]
    fn test_record_outcome_tracks_failures() {
        let (registry, _) = registry(&[ProviderId::Groq]);

        registry.record_outcome(ProviderId::Groq, &failure(ProviderId::Groq));
        registry.record_outcome(ProviderId::Groq, &failure(ProviderId::Groq));
        let record = registry.health(ProviderId::Groq).unwrap();
        assert!(!record.healthy);
        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(record.last_error.as_deref(), Some("down"));
        assert_eq!(record.last_response_time_ms, Some(40));

        registry.record_outcome(
            ProviderId::Groq,
            &AttemptOutcome::success(ProviderId::Groq, 15, 1),
        );
        let record = registry.health(ProviderId::Groq).unwrap();
        assert!(record.healthy);
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.last_error.is_none());
        assert!(record.last_checked_at.is_some());
    }

    #[test]
    fn test_duplicate_adapters_keep_first() {
        let (registry, _) = registry(&[ProviderId::Groq, ProviderId::Groq, ProviderId::Cohere]);
        assert_eq!(registry.providers(), &[ProviderId::Groq, ProviderId::Cohere]);
    }

    #[test]
    fn test_empty_registry() {
        let registry = ProviderRegistry::new(Vec::new());
        assert!(registry.is_empty());
        assert!(registry.select_candidates(Some(ProviderId::Groq)).is_empty());
    }

    #[tokio::test]
    async fn test_probe_all_updates_records() {
        let (registry, mocks) = registry(&[ProviderId::Groq, ProviderId::Gemini]);
        mocks[1].set_healthy(false);

        let results = registry.probe_all().await;

        assert_eq!(results.len(), 2);
        assert!(registry.health(ProviderId::Groq).unwrap().healthy);
        let gemini = registry.health(ProviderId::Gemini).unwrap();
        assert!(!gemini.healthy);
        assert!(gemini.last_error.is_some());
        assert_eq!(mocks[0].probe_count(), 1);
    }

    #[tokio::test]
    async fn test_probe_unknown_provider() {
        let (registry, _) = registry(&[ProviderId::Groq]);
        assert!(registry.probe(ProviderId::Cohere).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_monitor_probes_until_shutdown() {
        let (registry, mocks) = registry(&[ProviderId::Groq]);
        let registry = Arc::new(registry);

        registry.start(Duration::from_secs(10)).await;
        assert!(registry.is_monitoring().await);

        tokio::time::sleep(Duration::from_secs(25)).await;
        let probes = mocks[0].probe_count();
        assert!(probes >= 3, "expected at least 3 probes, got {probes}");

        registry.shutdown().await;
        assert!(!registry.is_monitoring().await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(mocks[0].probe_count(), probes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_does_not_start_monitor() {
        let (registry, mocks) = registry(&[ProviderId::Groq]);
        let registry = Arc::new(registry);

        registry.start(Duration::ZERO).await;
        assert!(!registry.is_monitoring().await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mocks[0].probe_count(), 0);
    }
}
