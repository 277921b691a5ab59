use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::errors::AppError;
use crate::models::{Conversation, ConversationId, ConversationSummary, Message, NewConversation, Sender};

use super::PersistenceService;

#[derive(Default)]
struct MemoryState {
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

/// Process-local store for offline use.
#[derive(Default)]
pub struct InMemoryPersistence {
    state: Mutex<MemoryState>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(id: &ConversationId) -> AppError {
        AppError::ConversationNotFound { id: id.to_string() }
    }
}

#[async_trait]
impl PersistenceService for InMemoryPersistence {
    async fn create_conversation(&self, meta: NewConversation) -> Result<ConversationId, AppError> {
        let id = ConversationId(uuid::Uuid::new_v4().simple().to_string());
        let mut state = self.state.lock();
        state.conversations.push(Conversation {
            id: id.clone(),
            title: meta.title,
            created_at: Utc::now(),
            last_message_summary: meta.message,
        });
        state.messages.insert(id.clone(), Vec::new());
        Ok(id)
    }

    /// Newest first, like the server.
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
        let mut list = self.state.lock().conversations.clone();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), AppError> {
        let mut state = self.state.lock();
        let before = state.conversations.len();
        state.conversations.retain(|c| &c.id != id);
        if state.conversations.len() == before {
            return Err(Self::not_found(id));
        }
        state.messages.remove(id);
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        sender: Sender,
        text: &str,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock();
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| &c.id == conversation_id)
            .ok_or_else(|| Self::not_found(conversation_id))?;
        conversation.last_message_summary = text.to_string();
        state
            .messages
            .entry(conversation_id.clone())
            .or_default()
            .push(Message::new(sender, text));
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, AppError> {
        self.state
            .lock()
            .messages
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| Self::not_found(conversation_id))
    }
}
