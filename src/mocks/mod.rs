//! Test doubles for adapters and transports.
//!
//! [`MockTransport`] stands in for the reqwest client below an adapter;
//! [`MockAdapter`] stands in for a whole provider above the transport, with
//! scripted outcomes and call counters.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::errors::{ErrorKind, ProviderError, ProviderResult};
use crate::providers::{HealthCheckResult, ProviderAdapter};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::types::chat::{ChatCompletion, ChatCompletionRequest};
use crate::types::query::ProviderId;
use crate::types::response::TokenUsage;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A canned reply for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockResponse(HttpResponse);

impl MockResponse {
    /// 200 with `value` as the JSON body.
    pub fn json<T: serde::Serialize>(value: &T) -> Self {
        Self::raw(200, serde_json::to_vec(value).unwrap_or_default())
            .with_header("content-type", "application/json")
    }

    /// `status` with an OpenAI-shaped `{"error": {...}}` body.
    pub fn error(status: u16, message: &str) -> Self {
        let mut reply = Self::json(&serde_json::json!({
            "error": {"message": message, "type": "error"}
        }));
        reply.0.status = status;
        reply
    }

    /// `status` with `body` as is.
    pub fn raw(status: u16, body: Vec<u8>) -> Self {
        Self(HttpResponse {
            status,
            headers: HashMap::new(),
            body,
        })
    }

    /// Adds a response header; the name is lowercased like the real transport does.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.0
            .headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }
}

/// Transport that replays queued replies and records what it was sent.
///
/// When the queue is empty every call gets a 500.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Result<MockResponse, TransportError>>>,
    sent: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// An empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply.
    pub fn queue(&self, response: MockResponse) {
        lock(&self.replies).push_back(Ok(response));
    }

    /// Queues a 200 JSON reply.
    pub fn queue_json<T: serde::Serialize>(&self, value: &T) {
        self.queue(MockResponse::json(value));
    }

    /// Queues a failure below the HTTP layer.
    pub fn queue_failure(&self, error: TransportError) {
        lock(&self.replies).push_back(Err(error));
    }

    /// Every request sent so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.sent).clone()
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<HttpRequest> {
        lock(&self.sent).last().cloned()
    }

    /// How many requests were sent.
    pub fn request_count(&self) -> usize {
        lock(&self.sent).len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.sent).push(request);

        match lock(&self.replies).pop_front() {
            Some(reply) => reply.map(|MockResponse(response)| response),
            None => Ok(MockResponse::error(500, "No mock response configured").0),
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("sent", &self.request_count())
            .field("queued", &lock(&self.replies).len())
            .finish()
    }
}

/// Provider adapter with scripted outcomes.
///
/// Queued outcomes are consumed one per `chat` call; once the script runs
/// out the default outcome repeats.
pub struct MockAdapter {
    id: ProviderId,
    model: String,
    script: Mutex<VecDeque<ProviderResult<String>>>,
    default_outcome: Mutex<ProviderResult<String>>,
    delay: Option<Duration>,
    healthy: AtomicBool,
    calls: AtomicUsize,
    probes: AtomicUsize,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl MockAdapter {
    /// An adapter that always answers.
    pub fn new(id: ProviderId) -> Self {
        Self::succeeding(id, format!("Mock answer from {id}"))
    }

    /// An adapter that always answers with `content`.
    pub fn succeeding(id: ProviderId, content: impl Into<String>) -> Self {
        Self::with_default(id, Ok(content.into()))
    }

    /// An adapter that always fails with `kind`.
    pub fn failing(id: ProviderId, kind: ErrorKind) -> Self {
        Self::with_default(id, Err(mock_error(id, kind)))
    }

    fn with_default(id: ProviderId, outcome: ProviderResult<String>) -> Self {
        Self {
            id,
            model: format!("{id}-mock-model"),
            script: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(outcome),
            delay: None,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Delays every `chat` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a successful outcome.
    pub fn push_ok(&self, content: impl Into<String>) {
        lock(&self.script).push_back(Ok(content.into()));
    }

    /// Queues a failure.
    pub fn push_err(&self, kind: ErrorKind) {
        lock(&self.script).push_back(Err(mock_error(self.id, kind)));
    }

    /// Queues a specific provider error.
    pub fn push_error(&self, error: ProviderError) {
        lock(&self.script).push_back(Err(error));
    }

    /// Sets what health probes report.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of `chat` calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of health probes made.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Requests seen by `chat`.
    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        lock(&self.requests).clone()
    }
}

fn mock_error(id: ProviderId, kind: ErrorKind) -> ProviderError {
    ProviderError::new(id, kind, format!("mock {kind}"))
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> HealthCheckResult {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            HealthCheckResult::healthy(1)
        } else {
            HealthCheckResult::unhealthy(1, format!("{} unavailable: mock probe failed", self.id))
        }
    }

    async fn chat(&self, request: ChatCompletionRequest) -> ProviderResult<ChatCompletion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        lock(&self.requests).push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| lock(&self.default_outcome).clone());

        outcome.map(|content| ChatCompletion {
            content,
            model_used: model,
            tokens_used: TokenUsage::new(10, 5),
            latency_ms: 1,
        })
    }
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapter")
            .field("id", &self.id)
            .field("calls", &self.call_count())
            .finish()
    }
}
