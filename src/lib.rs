//! Provider Orchestrator
//!
//! Routes a single "answer this query" request across interchangeable
//! upstream LLM providers (Groq, Cerebras, Mistral, OpenRouter, Gemini,
//! Cohere). A request is tried against a health-ordered list of candidates,
//! each attempt is retried with exponential backoff, and when every provider
//! fails the caller still receives a clearly labelled offline response.
//!
//! # Features
//!
//! - **Backoff**: cancellable exponential backoff with jitter
//! - **Health-aware selection**: advisory per-provider health records fed by
//!   live traffic and background probes
//! - **Fallback**: sequential fallback across providers, degraded response on
//!   exhaustion
//! - **Caching**: short-lived response cache keyed by user, chat type and message
//! - **Streaming**: typed `start`/`metadata`/`content`/`end`/`error` frames on
//!   a `data: <JSON>\n\n` wire format
//! - **Secrets**: AES-256-GCM credential store for provider API keys
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use provider_orchestrator::{ChatType, QueryOrchestrator, QueryRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = QueryOrchestrator::builder().from_env()?.build()?;
//!
//!     let request = QueryRequest::new("user-1", "Explain photosynthesis")
//!         .chat_type(ChatType::StudyAssistant)
//!         .preferred_provider("groq");
//!
//!     let response = orchestrator.handle(&request).await?;
//!     println!("[{}] {}", response.provider_used, response.content);
//!     Ok(())
//! }
//! ```
//!
//! # Streaming Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use provider_orchestrator::{QueryOrchestrator, QueryRequest, StreamFramer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Arc::new(QueryOrchestrator::builder().from_env()?.build()?);
//!     let framer = StreamFramer::new(orchestrator);
//!
//!     let mut frames = framer
//!         .stream(QueryRequest::new("user-1", "Hello"), CancellationToken::new())
//!         .into_sse_stream();
//!
//!     while let Some(bytes) = frames.next().await {
//!         print!("{}", String::from_utf8_lossy(&bytes));
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod observability;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod resilience;
pub mod secrets;
pub mod service;
pub mod streaming;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config::{OrchestratorConfig, ProviderConfig};
pub use errors::{
    CollaboratorError, ConfigError, ErrorKind, OrchestratorError, OrchestratorResult, ProviderError,
    ProviderResult, SecretError,
};
pub use orchestrator::{OrchestratorBuilder, QueryHandler, QueryOrchestrator};
pub use providers::{HealthCheckResult, ProviderAdapter};
pub use registry::{HealthRecord, ProviderRegistry};
pub use resilience::{BackoffError, BackoffExecutor, BackoffOptions};
pub use secrets::{AesGcmCipher, CredentialStore, EncryptedSecret, SecretCipher};
pub use service::{
    ChatPipeline, ConversationStore, MemoryContext, MemoryOptions, MemoryProvider,
};
pub use streaming::{FrameStream, StreamFrame, StreamFramer};

// Type re-exports
pub use types::chat::{ChatCompletion, ChatCompletionRequest, ChatMessage, Role};
pub use types::query::{ChatType, ProviderId, QueryRequest};
pub use types::response::{AttemptOutcome, NormalizedResponse, ProviderUsed, TokenUsage};

// Test doubles, public so integration tests and downstream crates can use them.
pub mod mocks;
