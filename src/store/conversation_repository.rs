use serde::Deserialize;
use tracing::error;

use crate::api::{self, ApiClient};
use crate::errors::AppError;
use crate::models::{Conversation, ConversationId, NewConversation};

#[derive(Debug, Deserialize)]
struct CreatedConversation {
    conversation_id: String,
}

#[derive(Debug, Deserialize)]
struct ConversationList {
    #[serde(default)]
    conversations: Vec<ConversationRow>,
}

#[derive(Debug, Deserialize)]
struct ConversationRow {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    last_message: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: ConversationId(row.id),
            title: row.title.unwrap_or_else(|| "Untitled chat".to_string()),
            created_at: api::parse_timestamp(row.created_at.as_deref()),
            last_message_summary: row.last_message.unwrap_or_default(),
        }
    }
}

/// Conversation records behind `/api/conversations`.
#[derive(Clone)]
pub struct ConversationRepository {
    api: ApiClient,
}

impl ConversationRepository {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn find_all(&self) -> Result<Vec<Conversation>, AppError> {
        let list: ConversationList = api::send_json(self.api.get("/api/conversations"))
            .await
            .map_err(|e| {
                error!("Failed to fetch all conversations: {e}");
                to_persistence_error(e, "conversations")
            })?;
        Ok(list.conversations.into_iter().map(Conversation::from).collect())
    }

    pub async fn create(&self, meta: &NewConversation) -> Result<ConversationId, AppError> {
        let created: CreatedConversation =
            api::send_json(self.api.post("/api/conversations").json(meta))
                .await
                .map_err(|e| {
                    error!("Failed to create conversation '{}': {e}", meta.title);
                    to_persistence_error(e, "new conversation")
                })?;
        Ok(ConversationId(created.conversation_id))
    }

    pub async fn delete(&self, id: &ConversationId) -> Result<(), AppError> {
        api::send_ok(self.api.delete(&format!("/api/conversations/{id}")))
            .await
            .map_err(|e| {
                error!("Failed to delete conversation {id}: {e}");
                to_persistence_error(e, id.as_str())
            })
    }
}

/// 404 becomes `ConversationNotFound`; every other failure a persistence error.
pub(crate) fn to_persistence_error(err: AppError, subject: &str) -> AppError {
    match err {
        AppError::Transport { status: Some(404), .. } => {
            AppError::ConversationNotFound { id: subject.to_string() }
        }
        AppError::Transport { status, body } => {
            AppError::persistence(format!("{subject}: status {status:?}: {body}"))
        }
        other => AppError::persistence(format!("{subject}: {other}")),
    }
}
