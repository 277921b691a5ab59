//! Assistant endpoint I/O boundary.

pub mod http;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::errors::AppError;
use crate::models::ConversationId;

pub use self::http::HttpTransport;

/// Raw body frames exactly as the network delivered them.
pub type FrameStream = BoxStream<'static, Result<Vec<u8>, AppError>>;

/// The two reply shapes the assistant endpoint can produce.
pub enum StreamHandle {
    /// `text/event-stream` body, consumed frame by frame.
    EventStream(FrameStream),
    /// Any other 2xx body, read in full (expected `{"response": "..."}`).
    Complete(String),
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamHandle::EventStream(_) => f.write_str("EventStream(..)"),
            StreamHandle::Complete(body) => f.debug_tuple("Complete").field(body).finish(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues one chat request. A non-2xx reply flagged as over the token
    /// limit comes back as `AppError::TokenLimitExceeded`; other connection
    /// failures and non-2xx statuses as `AppError::Transport`.
    async fn open(&self, conversation_id: &ConversationId, text: &str) -> Result<StreamHandle, AppError>;
}
