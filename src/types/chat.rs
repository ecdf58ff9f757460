//! Provider-neutral chat completion types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::response::TokenUsage;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction.
    System,
    /// End user.
    User,
    /// Model output.
    Assistant,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Single-turn completion request handed to an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionRequest {
    /// Conversation so far, system instruction first.
    pub messages: Vec<ChatMessage>,
    /// Model override; adapters fall back to their configured model.
    pub model: Option<String>,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
}

impl ChatCompletionRequest {
    /// Creates a request from messages.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            timeout: None,
        }
    }

    /// Sets the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The system instruction, if the first message is one.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// The most recent user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Completion returned by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    /// Generated text.
    pub content: String,
    /// Model that produced it.
    pub model_used: String,
    /// Token accounting.
    pub tokens_used: TokenUsage,
    /// Latency of the successful call.
    pub latency_ms: u64,
}
