//! Metrics collection for routing decisions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::query::ProviderId;

/// Sink for routing counters.
pub trait MetricsCollector: Send + Sync {
    /// Records one provider, retries included.
    fn record_attempt(&self, provider: ProviderId, succeeded: bool, latency_ms: u64);

    /// Records a finished request.
    fn record_request(&self, latency_ms: u64);

    /// Records an answer that did not come from the first candidate.
    fn record_fallback(&self);

    /// Records a degraded response.
    fn record_degraded(&self);

    /// Records a cache hit.
    fn record_cache_hit(&self);

    /// Records token usage.
    fn record_tokens(&self, input: u32, output: u32);

    /// Point-in-time copy of every counter.
    fn snapshot(&self) -> OrchestratorMetrics;

    /// Zeroes every counter.
    fn reset(&self);
}

/// Per-provider counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCounters {
    /// Provider runs that ended in an answer.
    pub successes: u64,
    /// Provider runs that ended in a failure.
    pub failures: u64,
    /// Time spent on the provider.
    pub total_latency_ms: u64,
}

/// Counters as of one [`MetricsCollector::snapshot`] call.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorMetrics {
    /// Finished requests, cache hits and degraded responses included.
    pub total_requests: u64,
    /// Answers from a provider other than the first candidate.
    pub fallbacks: u64,
    /// Degraded responses.
    pub degraded: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Total request latency in milliseconds.
    pub total_latency_ms: u64,
    /// Total input tokens.
    pub input_tokens: u64,
    /// Total output tokens.
    pub output_tokens: u64,
    /// Counters per provider; providers never tried are absent.
    pub providers: HashMap<ProviderId, ProviderCounters>,
}

impl OrchestratorMetrics {
    /// Average request latency in milliseconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_requests as f64
        }
    }

    /// Share of requests served from the cache, as a percentage.
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / self.total_requests as f64) * 100.0
        }
    }

    /// Counters for one provider.
    pub fn provider(&self, id: ProviderId) -> ProviderCounters {
        self.providers.get(&id).copied().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct ProviderSlot {
    successes: AtomicU64,
    failures: AtomicU64,
    latency_ms: AtomicU64,
}

impl ProviderSlot {
    fn load(&self) -> ProviderCounters {
        ProviderCounters {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_latency_ms: self.latency_ms.load(Ordering::Relaxed),
        }
    }

    fn clear(&self) {
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.latency_ms.store(0, Ordering::Relaxed);
    }
}

/// Lock-free in-process counters; one slot per known provider.
#[derive(Default)]
pub struct DefaultMetricsCollector {
    requests: AtomicU64,
    request_latency_ms: AtomicU64,
    fallbacks: AtomicU64,
    degraded: AtomicU64,
    cache_hits: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    slots: [ProviderSlot; ProviderId::ALL.len()],
}

impl DefaultMetricsCollector {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, provider: ProviderId) -> Option<&ProviderSlot> {
        let index = ProviderId::ALL.iter().position(|id| *id == provider)?;
        self.slots.get(index)
    }

    fn scalars(&self) -> [&AtomicU64; 7] {
        [
            &self.requests,
            &self.request_latency_ms,
            &self.fallbacks,
            &self.degraded,
            &self.cache_hits,
            &self.input_tokens,
            &self.output_tokens,
        ]
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl MetricsCollector for DefaultMetricsCollector {
    fn record_attempt(&self, provider: ProviderId, succeeded: bool, latency_ms: u64) {
        let Some(slot) = self.slot(provider) else {
            return;
        };
        bump(if succeeded { &slot.successes } else { &slot.failures }, 1);
        bump(&slot.latency_ms, latency_ms);
    }

    fn record_request(&self, latency_ms: u64) {
        bump(&self.requests, 1);
        bump(&self.request_latency_ms, latency_ms);
    }

    fn record_fallback(&self) {
        bump(&self.fallbacks, 1);
    }

    fn record_degraded(&self) {
        bump(&self.degraded, 1);
    }

    fn record_cache_hit(&self) {
        bump(&self.cache_hits, 1);
    }

    fn record_tokens(&self, input: u32, output: u32) {
        bump(&self.input_tokens, u64::from(input));
        bump(&self.output_tokens, u64::from(output));
    }

    fn snapshot(&self) -> OrchestratorMetrics {
        let providers = ProviderId::ALL
            .into_iter()
            .zip(&self.slots)
            .map(|(id, slot)| (id, slot.load()))
            .filter(|(_, counters)| *counters != ProviderCounters::default())
            .collect();

        OrchestratorMetrics {
            total_requests: self.requests.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            total_latency_ms: self.request_latency_ms.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            providers,
        }
    }

    fn reset(&self) {
        for counter in self.scalars() {
            counter.store(0, Ordering::Relaxed);
        }
        self.slots.iter().for_each(ProviderSlot::clear);
    }
}

impl std::fmt::Debug for DefaultMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("DefaultMetricsCollector")
            .field("requests", &snapshot.total_requests)
            .field("degraded", &snapshot.degraded)
            .field("cache_hits", &snapshot.cache_hits)
            .finish_non_exhaustive()
    }
}
