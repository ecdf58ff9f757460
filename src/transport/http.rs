//! reqwest-backed transport.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder};
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

use super::TransportError;

const POOL_IDLE_PER_HOST: usize = 10;
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// The verbs adapters need: chat calls POST, health probes GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Probe or listing.
    Get,
    /// Completion call.
    Post,
}

/// An outgoing call, addressed relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Verb.
    pub method: HttpMethod,
    /// Path below the base URL; a leading slash is optional.
    pub path: String,
    /// Headers as given by the adapter.
    pub headers: HashMap<String, String>,
    /// Serialized payload.
    pub body: Option<Vec<u8>>,
    /// Per-call deadline; the client-wide timeout applies when unset.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// A GET for `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// A POST for `path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    /// Serializes `body` as the payload and marks it as JSON.
    pub fn with_json<T: serde::Serialize>(self, body: &T) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(body)?;
        let mut request = self.with_header("Content-Type", "application/json");
        request.body = Some(payload);
        Ok(request)
    }

    /// Adds or replaces one header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Caps this call at `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What came back, fully buffered.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one request and buffers the reply.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs `request`. Non-2xx statuses are returned as responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Pooled reqwest client bound to one provider's base URL.
pub struct HttpTransportImpl {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransportImpl {
    /// Builds a client whose calls time out after `timeout` unless overridden.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .pool_max_idle_per_host(POOL_IDLE_PER_HOST)
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()
            .map_err(|e| TransportError::Connection {
                message: e.to_string(),
            })?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn map_error(&self, error: &reqwest::Error, deadline: Option<Duration>) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                timeout: deadline.unwrap_or(self.timeout),
            }
        } else if error.is_connect() {
            TransportError::Connection {
                message: error.to_string(),
            }
        } else {
            TransportError::InvalidResponse {
                message: error.to_string(),
            }
        }
    }
}

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

#[async_trait]
impl HttpTransport for HttpTransportImpl {
    #[instrument(skip(self, request), fields(method = ?request.method, path = %request.path))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            path,
            headers,
            body,
            timeout,
        } = request;

        let url = self.build_url(&path);
        let builder = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        let builder = headers
            .iter()
            .fold(builder, |builder, (name, value)| builder.header(name, value));
        let builder = match body {
            Some(body) => builder.body(body),
            None => builder,
        };
        let builder = match timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_error(&e, timeout))?;

        let status = response.status().as_u16();
        let headers = lowercase_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(&e, timeout))?;

        tracing::trace!(status, bytes = body.len(), "Response received");

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

impl std::fmt::Debug for HttpTransportImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransportImpl")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
