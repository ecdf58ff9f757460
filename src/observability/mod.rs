//! Observability for the orchestration layer.
//!
//! Provides tracing subscriber setup, redaction of credentials in free-form
//! text, and counters for routing decisions.

mod logging;
mod metrics;

pub use logging::{init_tracing, redact, LogConfig, LogFormat, LogLevel};
pub use metrics::{DefaultMetricsCollector, MetricsCollector, OrchestratorMetrics, ProviderCounters};

use std::time::Instant;

/// Milliseconds elapsed since `started`, saturating.
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
