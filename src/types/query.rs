//! Inbound query types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, OrchestratorResult};

/// Identity of an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Groq LPU inference.
    Groq,
    /// Cerebras inference.
    Cerebras,
    /// Mistral AI.
    Mistral,
    /// OpenRouter aggregator.
    OpenRouter,
    /// Google Gemini.
    Gemini,
    /// Cohere.
    Cohere,
}

impl ProviderId {
    /// Every provider, in the default priority order.
    pub const ALL: [ProviderId; 6] = [
        ProviderId::Groq,
        ProviderId::Cerebras,
        ProviderId::Mistral,
        ProviderId::OpenRouter,
        ProviderId::Gemini,
        ProviderId::Cohere,
    ];

    /// Wire name of the provider.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Groq => "groq",
            ProviderId::Cerebras => "cerebras",
            ProviderId::Mistral => "mistral",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Gemini => "gemini",
            ProviderId::Cohere => "cohere",
        }
    }

    /// Prefix of the provider's environment variables (`GROQ_API_KEY`, ...).
    pub fn env_prefix(self) -> &'static str {
        match self {
            ProviderId::Groq => "GROQ",
            ProviderId::Cerebras => "CEREBRAS",
            ProviderId::Mistral => "MISTRAL",
            ProviderId::OpenRouter => "OPENROUTER",
            ProviderId::Gemini => "GEMINI",
            ProviderId::Cohere => "COHERE",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ProviderId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                OrchestratorError::invalid_field(
                    format!("Unknown provider '{wanted}'"),
                    "preferredProvider",
                )
            })
    }
}

/// Kind of conversation the query belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    /// General purpose chat.
    #[default]
    General,
    /// Tutoring and study help.
    StudyAssistant,
    /// Programming help.
    CodeAssistant,
    /// Drafting and editing text.
    WritingAssistant,
    /// Research and summarisation.
    Research,
}

impl ChatType {
    /// Every chat type.
    pub const ALL: [ChatType; 5] = [
        ChatType::General,
        ChatType::StudyAssistant,
        ChatType::CodeAssistant,
        ChatType::WritingAssistant,
        ChatType::Research,
    ];

    /// Wire name of the chat type.
    pub fn as_str(self) -> &'static str {
        match self {
            ChatType::General => "general",
            ChatType::StudyAssistant => "study_assistant",
            ChatType::CodeAssistant => "code_assistant",
            ChatType::WritingAssistant => "writing_assistant",
            ChatType::Research => "research",
        }
    }

    /// System instruction sent ahead of the user message.
    pub fn system_prompt(self) -> &'static str {
        match self {
            ChatType::General => "You are a helpful assistant.",
            ChatType::StudyAssistant => {
                "You are a patient study assistant. Explain concepts step by step."
            }
            ChatType::CodeAssistant => {
                "You are a programming assistant. Prefer concise, working examples."
            }
            ChatType::WritingAssistant => {
                "You are a writing assistant. Keep the author's voice and intent."
            }
            ChatType::Research => {
                "You are a research assistant. Be precise and note uncertainty."
            }
        }
    }
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ChatType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                OrchestratorError::invalid_field(format!("Unknown chat type '{wanted}'"), "chatType")
            })
    }
}

/// A single "answer this query" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Caller identity.
    pub user_id: String,
    /// Existing conversation, if any.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// The user's message.
    pub message: String,
    /// Conversation kind.
    #[serde(default)]
    pub chat_type: ChatType,
    /// Provider the caller would like to be served by. Kept as the raw
    /// string so unknown names are rejected during validation.
    #[serde(default)]
    pub preferred_provider: Option<String>,
    /// Whether application data may be pulled into the context.
    #[serde(default)]
    pub include_app_data: bool,
    /// Retrieved memory context placed ahead of the message in the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl QueryRequest {
    /// Creates a general chat request.
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: None,
            message: message.into(),
            chat_type: ChatType::General,
            preferred_provider: None,
            include_app_data: false,
            context: None,
        }
    }

    /// Sets the chat type.
    pub fn chat_type(mut self, chat_type: ChatType) -> Self {
        self.chat_type = chat_type;
        self
    }

    /// Sets the preferred provider by name.
    pub fn preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    /// Sets the conversation id.
    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Allows application data in the context.
    pub fn include_app_data(mut self, include: bool) -> Self {
        self.include_app_data = include;
        self
    }

    /// Sets the memory context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Validates the request and resolves the preferred provider.
    pub fn validate(&self, max_message_chars: usize) -> OrchestratorResult<Option<ProviderId>> {
        if self.user_id.trim().is_empty() {
            return Err(OrchestratorError::invalid_field(
                "User id is required",
                "userId",
            ));
        }

        if self.message.trim().is_empty() {
            return Err(OrchestratorError::invalid_field(
                "Message cannot be empty",
                "message",
            ));
        }

        let length = self.message.chars().count();
        if length > max_message_chars {
            return Err(OrchestratorError::invalid_field(
                format!("Message is {length} characters, limit is {max_message_chars}"),
                "message",
            ));
        }

        self.preferred_provider
            .as_deref()
            .map(str::parse::<ProviderId>)
            .transpose()
    }

    /// Text the providers see: memory context, if any, then the message.
    pub fn prompt(&self) -> String {
        match self.context.as_deref().map(str::trim) {
            Some(context) if !context.is_empty() => format!("{context}\n\n{}", self.message),
            _ => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_parse_case_insensitive() {
        assert_eq!("Groq".parse::<ProviderId>().unwrap(), ProviderId::Groq);
        assert_eq!(" openrouter ".parse::<ProviderId>().unwrap(), ProviderId::OpenRouter);
        assert!("openai".parse::<ProviderId>().is_err());
    }

    #[test]
    fn test_provider_id_serde_roundtrip_names() {
        let json = serde_json::to_string(&ProviderId::OpenRouter).unwrap();
        assert_eq!(json, "\"openrouter\"");
    }

    #[test]
    fn test_chat_type_parse() {
        assert_eq!(
            "study_assistant".parse::<ChatType>().unwrap(),
            ChatType::StudyAssistant
        );
        let err = "poetry".parse::<ChatType>().unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest { .. }));
    }

    #[test]
    fn test_validate_rejects_blank_message() {
        let request = QueryRequest::new("u1", "   ");
        assert!(request.validate(100).is_err());
    }

    #[test]
    fn test_validate_rejects_long_message() {
        let request = QueryRequest::new("u1", "x".repeat(11));
        assert!(request.validate(10).is_err());
        assert!(request.validate(11).is_ok());
    }

    #[test]
    fn test_validate_resolves_preferred_provider() {
        let request = QueryRequest::new("u1", "hi").preferred_provider("GEMINI");
        assert_eq!(request.validate(100).unwrap(), Some(ProviderId::Gemini));

        let request = QueryRequest::new("u1", "hi").preferred_provider("skynet");
        let err = request.validate(100).unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::invalid_field("Unknown provider 'skynet'", "preferredProvider")
        );
    }

    #[test]
    fn test_prompt_prepends_context() {
        let request = QueryRequest::new("u1", "What did I say?").context("User likes tea.");
        assert_eq!(request.prompt(), "User likes tea.\n\nWhat did I say?");

        let request = QueryRequest::new("u1", "Hello").context("  ");
        assert_eq!(request.prompt(), "Hello");
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: QueryRequest = serde_json::from_str(
            r#"{"userId":"u1","message":"hi","chatType":"code_assistant","preferredProvider":"cohere"}"#,
        )
        .unwrap();

        assert_eq!(request.chat_type, ChatType::CodeAssistant);
        assert_eq!(request.preferred_provider.as_deref(), Some("cohere"));
        assert!(request.conversation_id.is_none());
        assert!(!request.include_app_data);
    }
}
