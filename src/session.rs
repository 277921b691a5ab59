//! One in-flight exchange: from the placeholder bot message to a terminal state.
//!
//! Deltas land in the session's accumulator as soon as they arrive. The
//! message log only sees them on the periodic flush, or on the final flush
//! when the stream ends. The session text is the source of truth and the log
//! entry is its projection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::AppError;
use crate::message_log::MessageLog;
use crate::models::{ChatResponse, ConversationId, Message, Sender};
use crate::parser::{parse_events, StreamEvent};
use crate::transport::{FrameStream, StreamHandle, Transport};

pub const APOLOGY_TEXT: &str = "Désolé, une erreur s'est produite. Veuillez réessayer.";

pub const TOKEN_LIMIT_TEXT: &str = "⚠️ **Limite de taille de conversation atteinte**\n\n\
     Cette conversation est devenue trop longue. Pour continuer à discuter, \
     veuillez créer une nouvelle conversation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    Streaming,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed | SessionState::Cancelled)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { text: String },
    Failed { reason: String },
    /// The server refused the message because the conversation is full.
    TokenLimited,
    Cancelled,
}

/// Conversations the server refused as too long, shared between sessions and
/// the chat service.
pub type BlockList = Arc<Mutex<HashSet<ConversationId>>>;

/// Timing policy for one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub flush_interval: Duration,
    pub read_timeout: Duration,
}

struct SessionInner {
    state: SessionState,
    /// Deltas not yet flushed to the log.
    buffer: String,
    accumulated_text: String,
    /// Set when the log entry lags behind `accumulated_text`.
    dirty: bool,
}

pub struct StreamSession {
    session_id: String,
    conversation_id: ConversationId,
    target_message_id: String,
    inner: Mutex<SessionInner>,
    cancel: CancellationToken,
    log: Arc<MessageLog>,
    blocked: BlockList,
}

impl StreamSession {
    pub fn new(
        conversation_id: ConversationId,
        target_message_id: String,
        log: Arc<MessageLog>,
        blocked: BlockList,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            target_message_id,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                buffer: String::new(),
                accumulated_text: String::new(),
                dirty: false,
            }),
            cancel: CancellationToken::new(),
            log,
            blocked,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn target_message_id(&self) -> &str {
        &self.target_message_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn accumulated_text(&self) -> String {
        self.inner.lock().accumulated_text.clone()
    }

    /// Idle → Sending, once the placeholder is in the log.
    pub fn mark_sending(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Idle {
            inner.state = SessionState::Sending;
        }
    }

    /// Stops the session. Once this returns, the session never writes to the
    /// log again. Returns false if it had already terminated.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = SessionState::Cancelled;
        inner.buffer.clear();
        inner.dirty = false;
        drop(inner);
        self.cancel.cancel();
        debug!("Session {} cancelled", self.session_id);
        true
    }

    /// Periodic flush: copies the session text into the target message.
    pub fn flush(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut SessionInner) -> bool {
        if !inner.dirty {
            return false;
        }
        let text = inner.accumulated_text.clone();
        self.log.mutate(&self.target_message_id, |m| m.text = text);
        inner.buffer.clear();
        inner.dirty = false;
        true
    }

    /// Applies one parser event. Returns the outcome once the session is over.
    pub fn on_event(&self, event: StreamEvent) -> Option<SessionOutcome> {
        match event {
            StreamEvent::End => Some(self.finalize()),
            StreamEvent::Error(reason) => Some(self.fail(&AppError::Stream { reason })),
            StreamEvent::Start => {
                let mut inner = self.inner.lock();
                if inner.state == SessionState::Cancelled {
                    return Some(SessionOutcome::Cancelled);
                }
                inner.accumulated_text.clear();
                inner.buffer.clear();
                inner.dirty = true;
                inner.state = SessionState::Streaming;
                None
            }
            StreamEvent::Delta(text) => {
                let mut inner = self.inner.lock();
                if inner.state == SessionState::Cancelled {
                    return Some(SessionOutcome::Cancelled);
                }
                inner.accumulated_text.push_str(&text);
                inner.buffer.push_str(&text);
                inner.dirty = true;
                inner.state = SessionState::Streaming;
                None
            }
        }
    }

    /// Finalizing → Completed with one last flush.
    pub fn finalize(&self) -> SessionOutcome {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Cancelled {
            return SessionOutcome::Cancelled;
        }
        inner.state = SessionState::Finalizing;
        inner.dirty = true;
        self.flush_locked(&mut inner);
        inner.state = SessionState::Completed;
        SessionOutcome::Completed { text: inner.accumulated_text.clone() }
    }

    /// Replaces the placeholder wholesale with the fixed apology, or with the
    /// token-limit warning when the server refused the conversation. A refused
    /// conversation is blocked before the warning becomes visible.
    pub fn fail(&self, err: &AppError) -> SessionOutcome {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Cancelled {
            return SessionOutcome::Cancelled;
        }
        inner.state = SessionState::Failed;
        inner.buffer.clear();
        inner.dirty = false;

        let (text, outcome) = if err.is_token_limit() {
            warn!("Conversation {} hit its token limit", self.conversation_id);
            self.blocked.lock().insert(self.conversation_id.clone());
            (TOKEN_LIMIT_TEXT, SessionOutcome::TokenLimited)
        } else {
            error!("Session {} failed: {err}", self.session_id);
            (APOLOGY_TEXT, SessionOutcome::Failed { reason: err.to_string() })
        };
        let replacement = Message {
            id: self.target_message_id.clone(),
            sender: Sender::Bot,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        self.log.replace(&self.target_message_id, replacement);
        outcome
    }

    /// Opens the transport and drives the exchange to a terminal state.
    pub async fn run(
        self: Arc<Self>,
        transport: Arc<dyn Transport>,
        text: String,
        timing: SessionTiming,
    ) -> SessionOutcome {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return SessionOutcome::Cancelled,
            res = time::timeout(timing.read_timeout, transport.open(&self.conversation_id, &text)) => res,
        };
        let handle = match opened {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return self.fail(&e),
            Err(_) => return self.fail(&AppError::Timeout { after: timing.read_timeout }),
        };

        let mut events = match handle {
            StreamHandle::EventStream(frames) => parse_events(bounded_frames(frames, timing.read_timeout)),
            StreamHandle::Complete(body) => match serde_json::from_str::<ChatResponse>(&body) {
                Ok(reply) => stream::iter([Ok(StreamEvent::Delta(reply.response)), Ok(StreamEvent::End)]).boxed(),
                Err(e) => {
                    return self.fail(&AppError::Unexpected(format!("Unreadable chat response: {e}")))
                }
            },
        };

        let mut ticker = time::interval_at(Instant::now() + timing.flush_interval, timing.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionOutcome::Cancelled,
                _ = ticker.tick() => {
                    self.flush();
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        if let Some(outcome) = self.on_event(event) {
                            return outcome;
                        }
                    }
                    Some(Err(e)) => return self.fail(&e),
                    None => {
                        warn!("Stream for session {} closed without an end marker", self.session_id);
                        return self.finalize();
                    }
                },
            }
        }
    }
}

/// Ends `frames` with `AppError::Timeout` once no frame arrives within
/// `limit`. Any frame counts, including keep-alives that decode to nothing.
fn bounded_frames(frames: FrameStream, limit: Duration) -> FrameStream {
    stream::unfold(Some(frames), move |state| async move {
        let mut frames = state?;
        match time::timeout(limit, frames.next()).await {
            Ok(Some(frame)) => Some((frame, Some(frames))),
            Ok(None) => None,
            Err(_) => Some((Err(AppError::Timeout { after: limit }), None)),
        }
    })
    .boxed()
}

/// Caller-side view of a running session.
pub struct SessionHandle {
    session: Arc<StreamSession>,
    user_message_id: String,
    task: JoinHandle<SessionOutcome>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session.session_id())
            .field("user_message_id", &self.user_message_id)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<StreamSession>, user_message_id: String, task: JoinHandle<SessionOutcome>) -> Self {
        Self { session, user_message_id, task }
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    pub fn conversation_id(&self) -> &ConversationId {
        self.session.conversation_id()
    }

    pub fn user_message_id(&self) -> &str {
        &self.user_message_id
    }

    pub fn target_message_id(&self) -> &str {
        self.session.target_message_id()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn cancel(&self) -> bool {
        self.session.cancel()
    }

    /// Waits for the terminal state.
    pub async fn wait(self) -> SessionOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Session task {} aborted: {e}", self.session.session_id());
                SessionOutcome::Failed { reason: "session task aborted".to_string() }
            }
        }
    }
}
