//! Logging configuration and utilities.

use std::sync::OnceLock;

use regex::Regex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl From<LogLevel> for tracing::level_filters::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output for development.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Minimum level when `RUST_LOG` does not say otherwise.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Include the event target.
    pub include_target: bool,
}

impl LogConfig {
    /// Creates a new log configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log level.
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the output format.
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Includes event targets in the output.
    pub fn with_target(mut self, include: bool) -> Self {
        self.include_target = include;
        self
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` directives take precedence over the configured level. Returns
/// false when a subscriber was already installed, which is not an error.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::from(config.level).into())
        .from_env_lossy();

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(config.include_target))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(config.include_target))
            .try_init(),
    };

    result.is_ok()
}

fn redaction_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"gsk_[A-Za-z0-9]+", "gsk_***"),
            (r"sk-[A-Za-z0-9_-]{8,}", "sk-***"),
            (r"AIza[0-9A-Za-z_-]{8,}", "AIza***"),
            (r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer ***"),
            (r"(?i)api[_-]?key[=:]\s*[^\s,}&]+", "api_key=***"),
            (r"(?i)authorization[=:]\s*[^\s,}]+", "authorization=***"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    })
}

/// Masks API keys and bearer tokens in free-form text.
///
/// Applied to provider error bodies before they are logged or stored in
/// health records.
pub fn redact(text: &str) -> String {
    redaction_patterns()
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}
