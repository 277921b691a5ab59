//! Persistence collaborator: conversations and their messages live in an
//! external store reached through a small save/list/delete contract.

pub mod conversation_repository;
pub mod memory;
pub mod message_repository;

use async_trait::async_trait;

use crate::api::ApiClient;
use crate::errors::AppError;
use crate::models::{ConversationId, ConversationSummary, Message, NewConversation, Sender};

use self::conversation_repository::ConversationRepository;
use self::message_repository::MessageRepository;

pub use self::memory::InMemoryPersistence;

#[async_trait]
pub trait PersistenceService: Send + Sync {
    async fn create_conversation(&self, meta: NewConversation) -> Result<ConversationId, AppError>;

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, AppError>;

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), AppError>;

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        sender: Sender,
        text: &str,
    ) -> Result<(), AppError>;

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, AppError>;
}

/// REST-backed store used against the real server.
#[derive(Clone)]
pub struct HttpPersistence {
    conversations: ConversationRepository,
    messages: MessageRepository,
}

impl HttpPersistence {
    pub fn new(api: ApiClient) -> Self {
        Self {
            conversations: ConversationRepository::new(api.clone()),
            messages: MessageRepository::new(api),
        }
    }
}

#[async_trait]
impl PersistenceService for HttpPersistence {
    async fn create_conversation(&self, meta: NewConversation) -> Result<ConversationId, AppError> {
        self.conversations.create(&meta).await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
        self.conversations.find_all().await
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), AppError> {
        self.conversations.delete(id).await
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        sender: Sender,
        text: &str,
    ) -> Result<(), AppError> {
        self.messages.save(conversation_id, sender, text).await
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, AppError> {
        self.messages.find_by_conversation_id(conversation_id).await
    }
}
