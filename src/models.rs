use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable conversation identifier handed out by the persistence service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a caller refers to a conversation before/after the server assigned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationRef {
    /// Locally generated placeholder; no server record yet.
    Local(String),
    Durable(ConversationId),
}

impl ConversationRef {
    pub fn durable(id: impl Into<String>) -> Self {
        ConversationRef::Durable(ConversationId::new(id))
    }

    pub fn as_durable(&self) -> Option<&ConversationId> {
        match self {
            ConversationRef::Durable(id) => Some(id),
            ConversationRef::Local(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    #[serde(alias = "assistant")]
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Sender {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Sender::User),
            "bot" | "assistant" => Ok(Sender::Bot),
            other => Err(format!("Unknown sender: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    /// Empty bot entry that a stream session fills in.
    pub fn placeholder() -> Self {
        Self::new(Sender::Bot, String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_message_summary: String,
}

/// Sidebar row as returned by `PersistenceService::list_conversations`.
pub type ConversationSummary = Conversation;

/// Metadata sent when a conversation is created out-of-band.
#[derive(Debug, Clone, Serialize)]
pub struct NewConversation {
    pub title: String,
    pub date: String,
    pub time: String,
    pub message: String,
}

impl NewConversation {
    pub fn new(title: String, first_message: &str) -> Self {
        let now = chrono::Local::now();
        Self {
            title,
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M").to_string(),
            message: first_message.to_string(),
        }
    }
}

// ── Assistant endpoint wire shapes ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: String,
    pub skip_save: bool,
}

/// Non-streaming reply body.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

/// `data:` payload of one event-stream record.
#[derive(Debug, Default, Deserialize)]
pub struct StreamPayload {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub content: Option<String>,
    pub error: Option<String>,
}

/// What the renderer needs to draw a live cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingStatus {
    pub streaming: bool,
    pub message_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_accepts_server_assistant_label() {
        let s: Sender = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(s, Sender::Bot);
        assert_eq!(Sender::try_from("USER".to_string()), Ok(Sender::User));
        assert!(Sender::try_from("system".to_string()).is_err());
    }

    #[test]
    fn message_ids_are_never_reused() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_ne!(a.id, b.id);
        assert!(Message::placeholder().text.is_empty());
    }

    #[test]
    fn stream_payload_reads_type_field() {
        let p: StreamPayload = serde_json::from_str(r#"{"type":"error","error":"quota"}"#).unwrap();
        assert_eq!(p.kind.as_deref(), Some("error"));
        assert_eq!(p.error.as_deref(), Some("quota"));
        assert!(p.content.is_none());
    }
}
