//! Chat pipeline wrapped around the orchestrator.
//!
//! The pipeline opens a conversation when the caller has none, prepends
//! retrieved memory to the prompt, runs the orchestrator and stores the
//! exchange. Storage and memory are best effort: their failures are logged
//! and never fail a request.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::errors::{CollaboratorError, OrchestratorResult};
use crate::orchestrator::{QueryHandler, QueryOrchestrator};
use crate::types::chat::Role;
use crate::types::query::{ChatType, QueryRequest};
use crate::types::response::NormalizedResponse;

/// Default number of memories requested per query.
pub const DEFAULT_MEMORY_LIMIT: usize = 5;

/// Persistence for conversations and their messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Creates a conversation and returns its id.
    async fn create_conversation(
        &self,
        user_id: &str,
        chat_type: ChatType,
    ) -> Result<String, CollaboratorError>;

    /// Appends a message to a conversation.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Options for a memory lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryOptions {
    /// Maximum memories to retrieve.
    pub limit: usize,
    /// Whether application data may be included.
    pub include_app_data: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_MEMORY_LIMIT,
            include_app_data: false,
        }
    }
}

/// Memory retrieved for a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryContext {
    /// Text placed ahead of the user's message.
    pub context_string: String,
    /// The individual memories behind `context_string`.
    pub memories: Vec<String>,
}

/// Source of user memory relevant to a query.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Retrieves memory relevant to `query`.
    async fn get_memory_context(
        &self,
        user_id: &str,
        query: &str,
        options: MemoryOptions,
    ) -> Result<MemoryContext, CollaboratorError>;
}

/// Orchestrator plus conversation and memory handling.
#[derive(Clone)]
pub struct ChatPipeline {
    orchestrator: Arc<QueryOrchestrator>,
    conversations: Option<Arc<dyn ConversationStore>>,
    memory: Option<Arc<dyn MemoryProvider>>,
    memory_limit: usize,
}

impl ChatPipeline {
    /// Creates a pipeline with no collaborators.
    pub fn new(orchestrator: Arc<QueryOrchestrator>) -> Self {
        Self {
            orchestrator,
            conversations: None,
            memory: None,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    /// Sets the conversation store.
    pub fn with_conversations(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    /// Sets the memory provider.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryProvider>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Sets how many memories are requested per query.
    pub fn memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// The wrapped orchestrator.
    pub fn orchestrator(&self) -> &Arc<QueryOrchestrator> {
        &self.orchestrator
    }

    /// Answers a query, handling conversation and memory around it.
    ///
    /// # Errors
    ///
    /// Same as [`QueryOrchestrator::handle_with_cancel`]. An invalid request
    /// is rejected before any collaborator is called.
    #[instrument(skip(self, request, cancel), fields(user_id = %request.user_id))]
    pub async fn handle(
        &self,
        mut request: QueryRequest,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<NormalizedResponse> {
        request.validate(self.orchestrator.config().max_message_chars)?;

        if request.conversation_id.is_none() {
            request.conversation_id = self.open_conversation(&request).await;
        }

        if let Some(context) = self.memory_context(&request).await {
            request.context = Some(match request.context.take() {
                Some(existing) => format!("{context}\n\n{existing}"),
                None => context,
            });
        }

        let response = self
            .orchestrator
            .handle_with_cancel(&request, cancel)
            .await?;

        self.persist(&response.conversation_id, &request.message, &response.content)
            .await;

        Ok(response)
    }

    async fn open_conversation(&self, request: &QueryRequest) -> Option<String> {
        let store = self.conversations.as_ref()?;
        match store
            .create_conversation(&request.user_id, request.chat_type)
            .await
        {
            Ok(id) => {
                tracing::debug!(conversation_id = %id, "Conversation created");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create conversation");
                None
            }
        }
    }

    async fn memory_context(&self, request: &QueryRequest) -> Option<String> {
        let memory = self.memory.as_ref()?;
        let options = MemoryOptions {
            limit: self.memory_limit,
            include_app_data: request.include_app_data,
        };

        match memory
            .get_memory_context(&request.user_id, &request.message, options)
            .await
        {
            Ok(context) if !context.context_string.trim().is_empty() => {
                tracing::debug!(memories = context.memories.len(), "Memory context attached");
                Some(context.context_string)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load memory context");
                None
            }
        }
    }

    async fn persist(&self, conversation_id: &str, message: &str, answer: &str) {
        let Some(store) = &self.conversations else {
            return;
        };

        for (role, content) in [(Role::User, message), (Role::Assistant, answer)] {
            if let Err(e) = store.append_message(conversation_id, role, content).await {
                tracing::warn!(
                    error = %e,
                    conversation_id,
                    role = role.as_str(),
                    "Failed to store message"
                );
            }
        }
    }
}

#[async_trait]
impl QueryHandler for ChatPipeline {
    async fn handle_query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> OrchestratorResult<NormalizedResponse> {
        self.handle(request, &cancel).await
    }
}

impl std::fmt::Debug for ChatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPipeline")
            .field("conversations", &self.conversations.is_some())
            .field("memory", &self.memory.is_some())
            .field("memory_limit", &self.memory_limit)
            .finish_non_exhaustive()
    }
}
