use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use crate::api::{self, ApiClient};
use crate::errors::AppError;
use crate::models::{ChatRequest, ConversationId};

use super::{StreamHandle, Transport};

const EVENT_STREAM: &str = "text/event-stream";

/// POSTs to `/api/chat` and branches on the reply's content type.
#[derive(Clone)]
pub struct HttpTransport {
    api: ApiClient,
    skip_save: bool,
}

impl HttpTransport {
    /// `skip_save` tells the server not to persist the exchange itself.
    pub fn new(api: ApiClient, skip_save: bool) -> Self {
        Self { api, skip_save }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, conversation_id: &ConversationId, text: &str) -> Result<StreamHandle, AppError> {
        let request = ChatRequest {
            message: text.to_string(),
            conversation_id: conversation_id.to_string(),
            skip_save: self.skip_save,
        };

        let resp = self
            .api
            .post("/api/chat")
            .header(ACCEPT, format!("{EVENT_STREAM}, application/json"))
            .json(&request)
            .send()
            .await
            .map_err(AppError::from_reqwest)?;
        let resp = api::ensure_success(resp)
            .await
            .map_err(AppError::classify_chat_failure)?;

        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains(EVENT_STREAM));

        if is_event_stream {
            debug!("Streaming reply for conversation {conversation_id}");
            let frames = resp
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()).map_err(AppError::from_reqwest));
            Ok(StreamHandle::EventStream(frames.boxed()))
        } else {
            debug!("Non-streaming reply for conversation {conversation_id}");
            let body = resp.text().await.map_err(AppError::from_reqwest)?;
            Ok(StreamHandle::Complete(body))
        }
    }
}
