#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use chat_stream_sync::errors::AppError;
use chat_stream_sync::models::{ConversationId, ConversationSummary, Message, NewConversation, Sender};
use chat_stream_sync::store::{InMemoryPersistence, PersistenceService};
use chat_stream_sync::transport::{StreamHandle, Transport};
use chat_stream_sync::{ChatService, ClientConfig};

pub type FrameSender = mpsc::UnboundedSender<Result<Vec<u8>, AppError>>;

/// What the next `open` call returns.
pub enum Reply {
    /// Event stream fed by the test through a channel.
    Live(mpsc::UnboundedReceiver<Result<Vec<u8>, AppError>>),
    Frames(Vec<&'static str>),
    Complete(String),
    Fail(AppError),
}

/// Transport that replays prepared replies in order and records requests.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    pub opened: Mutex<Vec<(ConversationId, String)>>,
}

impl ScriptedTransport {
    pub fn push(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    /// Queues a live stream and returns the sender that feeds it.
    pub fn push_live(&self) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Reply::Live(rx));
        tx
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, conversation_id: &ConversationId, text: &str) -> Result<StreamHandle, AppError> {
        self.opened.lock().push((conversation_id.clone(), text.to_string()));
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Reply::Fail(AppError::transport(None, "no scripted reply")));
        match reply {
            Reply::Live(rx) => {
                let frames = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|f| (f, rx)) });
                Ok(StreamHandle::EventStream(frames.boxed()))
            }
            Reply::Frames(frames) => {
                let frames: Vec<_> = frames.into_iter().map(|f| Ok(f.as_bytes().to_vec())).collect();
                Ok(StreamHandle::EventStream(stream::iter(frames).boxed()))
            }
            Reply::Complete(body) => Ok(StreamHandle::Complete(body)),
            Reply::Fail(e) => Err(e),
        }
    }
}

pub fn delta(text: &str) -> Result<Vec<u8>, AppError> {
    let payload = serde_json::json!({ "content": text });
    Ok(format!("data: {payload}\n\n").into_bytes())
}

pub fn end() -> Result<Vec<u8>, AppError> {
    Ok(b"data: {\"type\":\"end\"}\n\n".to_vec())
}

pub fn start() -> Result<Vec<u8>, AppError> {
    Ok(b"data: {\"type\":\"start\"}\n\n".to_vec())
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        flush_interval: Duration::from_millis(100),
        read_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

pub struct Harness {
    pub chat: ChatService,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<InMemoryPersistence>,
}

pub fn harness(config: ClientConfig) -> Harness {
    let transport = Arc::new(ScriptedTransport::default());
    let store = Arc::new(InMemoryPersistence::new());
    let chat = ChatService::new(&config, transport.clone(), store.clone());
    Harness { chat, transport, store }
}

/// `(sender, text)` pairs, ignoring ids and timestamps.
pub fn projection(messages: &[Message]) -> Vec<(Sender, String)> {
    messages.iter().map(|m| (m.sender, m.text.clone())).collect()
}

/// Store whose conversation creation works but whose message saves fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryPersistence,
    pub fail_create: bool,
}

impl FlakyStore {
    /// Also refuses to create conversations.
    pub fn refusing_creation() -> Self {
        Self { fail_create: true, ..Self::default() }
    }
}

#[async_trait]
impl PersistenceService for FlakyStore {
    async fn create_conversation(&self, meta: NewConversation) -> Result<ConversationId, AppError> {
        if self.fail_create {
            return Err(AppError::persistence("create refused"));
        }
        self.inner.create_conversation(meta).await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
        self.inner.list_conversations().await
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), AppError> {
        self.inner.delete_conversation(id).await
    }

    async fn append_message(&self, _: &ConversationId, _: Sender, _: &str) -> Result<(), AppError> {
        Err(AppError::persistence("store unavailable"))
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, AppError> {
        self.inner.list_messages(conversation_id).await
    }
}
