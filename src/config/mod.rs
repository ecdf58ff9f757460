//! Configuration for providers and the orchestrator.
//!
//! [`ProviderConfig`] describes one upstream (credentials, endpoint, model,
//! timeout). [`OrchestratorConfig`] holds the routing policy: priority order,
//! per-provider retry budget, request deadline, cache and health probing.
//! Both can be built explicitly or read from the environment.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use crate::errors::ConfigError;
use crate::resilience::BackoffOptions;
use crate::types::query::ProviderId;

/// Default per-call provider timeout (30 seconds).
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default health probe timeout (5 seconds).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default retries per provider before advancing to the next candidate.
pub const DEFAULT_ATTEMPT_RETRIES: u32 = 2;

/// Default maximum message length, in characters.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 32_000;

/// Default base URL of a provider.
pub fn default_base_url(id: ProviderId) -> &'static str {
    match id {
        ProviderId::Groq => "https://api.groq.com/openai/v1",
        ProviderId::Cerebras => "https://api.cerebras.ai/v1",
        ProviderId::Mistral => "https://api.mistral.ai/v1",
        ProviderId::OpenRouter => "https://openrouter.ai/api/v1",
        ProviderId::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        ProviderId::Cohere => "https://api.cohere.ai",
    }
}

/// Default model of a provider.
pub fn default_model(id: ProviderId) -> &'static str {
    match id {
        ProviderId::Groq => "llama-3.3-70b-versatile",
        ProviderId::Cerebras => "llama3.1-8b",
        ProviderId::Mistral => "mistral-small-latest",
        ProviderId::OpenRouter => "meta-llama/llama-3.3-70b-instruct",
        ProviderId::Gemini => "gemini-1.5-flash",
        ProviderId::Cohere => "command-r",
    }
}

/// Configuration for one provider.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Provider identity.
    pub id: ProviderId,
    /// API key for authentication (stored securely).
    pub(crate) api_key: SecretString,
    /// Base URL for API requests.
    pub base_url: String,
    /// Model used when a request does not name one.
    pub model: String,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Health probe timeout.
    pub probe_timeout: Duration,
}

impl ProviderConfig {
    /// Creates a configuration builder for the provider.
    pub fn builder(id: ProviderId) -> ProviderConfigBuilder {
        ProviderConfigBuilder::new(id)
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// With `<P>` the provider prefix (`GROQ`, `CEREBRAS`, `MISTRAL`,
    /// `OPENROUTER`, `GEMINI`, `COHERE`):
    ///
    /// - `<P>_API_KEY` (required): API key
    /// - `<P>_BASE_URL` (optional): custom base URL
    /// - `<P>_MODEL` (optional): default model
    /// - `<P>_TIMEOUT` (optional): request timeout in seconds
    pub fn from_env(id: ProviderId) -> Result<Self, ConfigError> {
        let prefix = id.env_prefix();
        let key_var = format!("{prefix}_API_KEY");
        let api_key = std::env::var(&key_var).map_err(|_| ConfigError::Missing {
            message: format!("{key_var} environment variable not set"),
        })?;

        let mut builder = ProviderConfigBuilder::new(id).api_key(api_key);

        if let Ok(base_url) = std::env::var(format!("{prefix}_BASE_URL")) {
            builder = builder.base_url(base_url);
        }

        if let Ok(model) = std::env::var(format!("{prefix}_MODEL")) {
            builder = builder.model(model);
        }

        if let Some(secs) = env_number(&format!("{prefix}_TIMEOUT"))? {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        builder.build()
    }

    /// Returns the API key secret.
    pub(crate) fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    /// Returns the API key hint (last 4 characters) for debugging.
    pub fn api_key_hint(&self) -> String {
        crate::auth::key_hint(self.api_key.expose_secret())
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for [`ProviderConfig`].
pub struct ProviderConfigBuilder {
    id: ProviderId,
    api_key: Option<SecretString>,
    base_url: Option<String>,
    model: Option<String>,
    timeout: Option<Duration>,
    probe_timeout: Option<Duration>,
}

impl ProviderConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            api_key: None,
            base_url: None,
            model: None,
            timeout: None,
            probe_timeout: None,
        }
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into()));
        self
    }

    /// Sets the API key from an already protected secret, e.g. one handed
    /// out by a [`CredentialStore`](crate::secrets::CredentialStore).
    pub fn api_key_secret(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the default model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the health probe timeout.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<ProviderConfig, ConfigError> {
        let api_key = self.api_key.ok_or_else(|| ConfigError::Missing {
            message: format!("API key is required for {}", self.id),
        })?;

        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::invalid("api_key", "API key cannot be empty"));
        }

        let base_url = self
            .base_url
            .unwrap_or_else(|| default_base_url(self.id).to_string())
            .trim_end_matches('/')
            .to_string();

        validate_base_url(&base_url)?;

        let model = self
            .model
            .unwrap_or_else(|| default_model(self.id).to_string());
        if model.trim().is_empty() {
            return Err(ConfigError::invalid("model", "Model cannot be empty"));
        }

        Ok(ProviderConfig {
            id: self.id,
            api_key,
            base_url,
            model,
            timeout: self.timeout.unwrap_or(DEFAULT_PROVIDER_TIMEOUT),
            probe_timeout: self.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT),
        })
    }
}

/// Base URLs must use HTTPS; plain HTTP is accepted for loopback hosts only.
fn validate_base_url(base_url: &str) -> Result<(), ConfigError> {
    let url = Url::parse(base_url)?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        _ => Err(ConfigError::invalid("base_url", "Base URL must use HTTPS")),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Routing policy of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Provider priority; configured providers missing here are appended.
    pub priority: Vec<ProviderId>,
    /// Retries per provider before advancing.
    pub attempt_retries: u32,
    /// First backoff delay within a provider.
    pub attempt_base_delay: Duration,
    /// Backoff delay cap within a provider.
    pub attempt_max_delay: Duration,
    /// Jitter on per-provider backoff.
    pub attempt_jitter: bool,
    /// Per-call timeout passed to adapters, if set.
    pub attempt_timeout: Option<Duration>,
    /// Budget for the whole request, if set.
    pub request_timeout: Option<Duration>,
    /// Time a cached response stays valid.
    pub cache_ttl: Duration,
    /// Maximum cached responses; zero disables caching.
    pub cache_capacity: usize,
    /// Longest accepted message.
    pub max_message_chars: usize,
    /// Background health probe interval.
    pub health_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            priority: ProviderId::ALL.to_vec(),
            attempt_retries: DEFAULT_ATTEMPT_RETRIES,
            attempt_base_delay: Duration::from_millis(250),
            attempt_max_delay: Duration::from_secs(2),
            attempt_jitter: true,
            attempt_timeout: None,
            request_timeout: None,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1_000,
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            health_interval: Duration::from_secs(60),
        }
    }
}

impl OrchestratorConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `ORCHESTRATOR_PROVIDER_PRIORITY`: comma separated provider names
    /// - `ORCHESTRATOR_ATTEMPT_RETRIES`: retries per provider
    /// - `ORCHESTRATOR_REQUEST_TIMEOUT_MS`: whole-request budget
    /// - `ORCHESTRATOR_CACHE_TTL_SECS`: cache entry lifetime
    /// - `ORCHESTRATOR_HEALTH_INTERVAL_SECS`: health probe interval
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(priority) = std::env::var("ORCHESTRATOR_PROVIDER_PRIORITY") {
            config.priority = parse_priority(&priority)?;
        }

        if let Some(retries) = env_number("ORCHESTRATOR_ATTEMPT_RETRIES")? {
            config.attempt_retries = u32::try_from(retries).map_err(|_| {
                ConfigError::invalid("ORCHESTRATOR_ATTEMPT_RETRIES", "value out of range")
            })?;
        }

        if let Some(ms) = env_number("ORCHESTRATOR_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Some(Duration::from_millis(ms));
        }

        if let Some(secs) = env_number("ORCHESTRATOR_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }

        if let Some(secs) = env_number("ORCHESTRATOR_HEALTH_INTERVAL_SECS")? {
            config.health_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the limits a running orchestrator depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_chars == 0 {
            return Err(ConfigError::invalid(
                "max_message_chars",
                "Message limit must be positive",
            ));
        }
        if self.health_interval.is_zero() {
            return Err(ConfigError::invalid(
                "health_interval",
                "Health probe interval must be positive",
            ));
        }
        Ok(())
    }

    /// Sets the background health probe interval.
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Sets the priority order.
    pub fn priority(mut self, priority: Vec<ProviderId>) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the retries per provider.
    pub fn attempt_retries(mut self, retries: u32) -> Self {
        self.attempt_retries = retries;
        self
    }

    /// Sets the per-provider backoff delays.
    pub fn attempt_delays(mut self, base: Duration, max: Duration) -> Self {
        self.attempt_base_delay = base;
        self.attempt_max_delay = max;
        self
    }

    /// Enables or disables per-provider jitter.
    pub fn attempt_jitter(mut self, jitter: bool) -> Self {
        self.attempt_jitter = jitter;
        self
    }

    /// Sets the whole-request budget.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the cache lifetime and capacity.
    pub fn cache(mut self, ttl: Duration, capacity: usize) -> Self {
        self.cache_ttl = ttl;
        self.cache_capacity = capacity;
        self
    }

    /// Sets the message length limit.
    pub fn max_message_chars(mut self, max: usize) -> Self {
        self.max_message_chars = max;
        self
    }

    /// Backoff options for one provider attempt, without cancellation.
    pub fn attempt_backoff(&self) -> BackoffOptions {
        BackoffOptions::new()
            .retries(self.attempt_retries)
            .base_delay(self.attempt_base_delay)
            .max_delay(self.attempt_max_delay)
            .jitter(self.attempt_jitter)
    }
}

fn parse_priority(raw: &str) -> Result<Vec<ProviderId>, ConfigError> {
    let mut priority = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = name
            .parse::<ProviderId>()
            .map_err(|e| ConfigError::invalid("ORCHESTRATOR_PROVIDER_PRIORITY", e.to_string()))?;
        if !priority.contains(&id) {
            priority.push(id);
        }
    }
    Ok(priority)
}

fn env_number(var: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(var, e.to_string())),
        Err(_) => Ok(None),
    }
}
