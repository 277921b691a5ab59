use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::{self, ApiClient};
use crate::errors::AppError;
use crate::models::{ConversationId, Message, Sender};

use super::conversation_repository::to_persistence_error;

#[derive(Debug, Serialize)]
struct NewMessage<'a> {
    sender: Sender,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRow>,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    #[serde(rename = "_id")]
    id: String,
    sender: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Messages of one conversation behind `/api/conversations/{id}/messages`.
#[derive(Clone)]
pub struct MessageRepository {
    api: ApiClient,
}

impl MessageRepository {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn find_by_conversation_id(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, AppError> {
        let list: MessageList = api::send_json(
            self.api.get(&format!("/api/conversations/{conversation_id}/messages")),
        )
        .await
        .map_err(|e| {
            error!("Failed to fetch messages for conversation {conversation_id}: {e}");
            to_persistence_error(e, conversation_id.as_str())
        })?;

        list.messages
            .into_iter()
            .map(|row| {
                let sender = Sender::try_from(row.sender)
                    .map_err(|e| AppError::Unexpected(format!("Unknown message sender: {e}")))?;
                Ok(Message {
                    id: row.id,
                    sender,
                    text: row.text,
                    created_at: api::parse_timestamp(row.timestamp.as_deref()),
                })
            })
            .collect()
    }

    pub async fn save(
        &self,
        conversation_id: &ConversationId,
        sender: Sender,
        text: &str,
    ) -> Result<(), AppError> {
        api::send_ok(
            self.api
                .post(&format!("/api/conversations/{conversation_id}/messages"))
                .json(&NewMessage { sender, text }),
        )
        .await
        .map_err(|e| {
            error!("Failed to save {sender} message in {conversation_id}: {e}");
            to_persistence_error(e, conversation_id.as_str())
        })
    }
}
