use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ClientConfig;
use crate::errors::AppError;
use crate::identity::ConversationResolver;
use crate::message_log::{LogChange, MessageLog};
use crate::models::{ConversationId, ConversationRef, ConversationSummary, Message, Sender, StreamingStatus};
use crate::session::{BlockList, SessionHandle, SessionOutcome, SessionTiming, StreamSession, APOLOGY_TEXT};
use crate::store::PersistenceService;
use crate::transport::Transport;

const MAX_MESSAGE_LENGTH: usize = 8000;

/// Entry point for the rendering layer: sends messages, owns the live
/// sessions, and exposes the shared message log.
#[derive(Clone)]
pub struct ChatService {
    log: Arc<MessageLog>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn PersistenceService>,
    resolver: ConversationResolver,
    sessions: Arc<Mutex<HashMap<ConversationId, Arc<StreamSession>>>>,
    /// Conversations refused by the server's token limit.
    blocked: BlockList,
    status: Arc<watch::Sender<StreamingStatus>>,
    timing: SessionTiming,
    client_side_save: bool,
}

impl ChatService {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PersistenceService>,
    ) -> Self {
        let (status, _) = watch::channel(StreamingStatus::default());
        Self {
            log: Arc::new(MessageLog::new()),
            transport,
            resolver: ConversationResolver::new(store.clone(), config.title_max_chars),
            store,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            blocked: BlockList::default(),
            status: Arc::new(status),
            timing: SessionTiming {
                flush_interval: config.flush_interval,
                read_timeout: config.read_timeout,
            },
            client_side_save: config.client_side_save,
        }
    }

    pub fn log(&self) -> Arc<MessageLog> {
        self.log.clone()
    }

    pub fn streaming_status(&self) -> watch::Receiver<StreamingStatus> {
        self.status.subscribe()
    }

    pub fn is_appendable(&self, id: &ConversationId) -> bool {
        !self.blocked.lock().contains(id)
    }

    /// Sends `text` into `conversation` (a new one when `None`) and starts
    /// streaming the reply into a placeholder bot message.
    ///
    /// The conversation id is settled before the stream opens. An open session
    /// for the same conversation is cancelled first.
    pub async fn send(
        &self,
        conversation: Option<ConversationRef>,
        text: &str,
    ) -> Result<SessionHandle, AppError> {
        // ── Validation ────────────────────────────────────────────────────────
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        if text.len() > MAX_MESSAGE_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "message".to_string(),
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: text.len(),
            });
        }
        if let Some(id) = conversation.as_ref().and_then(ConversationRef::as_durable) {
            if !self.is_appendable(id) {
                return Err(AppError::ConversationNotAppendable { id: id.to_string() });
            }
        }

        // ── Echo the user message ─────────────────────────────────────────────
        let user_message = Message::user(text);
        let user_message_id = user_message.id.clone();
        self.log.append(user_message);

        // ── Resolve or create conversation ────────────────────────────────────
        let conversation_id = match self.resolver.resolve(conversation.as_ref(), text).await {
            Ok(id) => id,
            Err(e) => {
                error!("Could not settle a conversation for the message: {e}");
                self.log.append(Message::new(Sender::Bot, APOLOGY_TEXT));
                return Err(e);
            }
        };

        // ── Supersede any open session, then register the new one ─────────────
        let placeholder = Message::placeholder();
        let session = {
            let mut sessions = self.sessions.lock();
            if let Some(prior) = sessions.remove(&conversation_id) {
                if prior.cancel() {
                    info!("Session {} superseded in conversation {conversation_id}", prior.session_id());
                }
            }
            let session = StreamSession::new(
                conversation_id.clone(),
                placeholder.id.clone(),
                self.log.clone(),
                self.blocked.clone(),
            );
            sessions.insert(conversation_id.clone(), session.clone());
            session
        };

        self.log.append(placeholder);
        session.mark_sending();
        self.status.send_replace(StreamingStatus {
            streaming: true,
            message_id: Some(session.target_message_id().to_string()),
        });

        let user_saved = self
            .client_side_save
            .then(|| self.persist_in_background(conversation_id.clone(), Sender::User, text.to_string(), None));

        let svc = self.clone();
        let driven = session.clone();
        let text = text.to_string();
        let task = tokio::spawn(async move { svc.drive(driven, text, user_saved).await });

        Ok(SessionHandle::new(session, user_message_id, task))
    }

    async fn drive(
        self,
        session: Arc<StreamSession>,
        text: String,
        user_saved: Option<JoinHandle<()>>,
    ) -> SessionOutcome {
        let outcome = session.clone().run(self.transport.clone(), text, self.timing).await;
        let conversation_id = session.conversation_id().clone();

        match &outcome {
            SessionOutcome::Completed { text } => {
                info!("Reply completed in conversation {conversation_id} ({} chars)", text.chars().count());
                if self.client_side_save {
                    self.persist_in_background(conversation_id.clone(), Sender::Bot, text.clone(), user_saved);
                }
                self.log.notify(LogChange::ConversationsChanged);
            }
            SessionOutcome::TokenLimited => {
                warn!("Conversation {conversation_id} is full; further sends are rejected");
            }
            SessionOutcome::Failed { reason } => {
                error!("Reply failed in conversation {conversation_id}: {reason}");
            }
            SessionOutcome::Cancelled => {
                info!("Session {} cancelled", session.session_id());
            }
        }

        self.release(&session);
        outcome
    }

    fn release(&self, session: &Arc<StreamSession>) {
        {
            let mut sessions = self.sessions.lock();
            if sessions.get(session.conversation_id()).is_some_and(|s| Arc::ptr_eq(s, session)) {
                sessions.remove(session.conversation_id());
            }
        }
        let target = session.target_message_id();
        self.status.send_if_modified(|status| {
            if status.message_id.as_deref() == Some(target) {
                *status = StreamingStatus::default();
                true
            } else {
                false
            }
        });
    }

    /// Best-effort save; failures are logged and never reach the caller.
    /// `after` orders this save behind an earlier one.
    fn persist_in_background(
        &self,
        conversation_id: ConversationId,
        sender: Sender,
        text: String,
        after: Option<JoinHandle<()>>,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Some(previous) = after {
                let _ = previous.await;
            }
            if let Err(e) = store.append_message(&conversation_id, sender, &text).await {
                error!("Failed to persist {sender} message in {conversation_id}: {e}");
            }
        })
    }

    fn cancel_all(&self) {
        let drained: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in drained {
            session.cancel();
        }
        self.status.send_replace(StreamingStatus::default());
    }

    /// Clears the chat panel for a fresh conversation.
    pub fn new_conversation(&self) {
        self.cancel_all();
        self.log.clear();
    }

    /// Loads a stored conversation into the log.
    pub async fn select_conversation(&self, id: &ConversationId) -> Result<(), AppError> {
        self.cancel_all();
        let messages = self.store.list_messages(id).await?;
        self.log.reset(messages);
        Ok(())
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
        self.store.list_conversations().await
    }

    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<(), AppError> {
        if let Some(session) = self.sessions.lock().remove(id) {
            session.cancel();
        }
        self.store.delete_conversation(id).await?;
        self.blocked.lock().remove(id);
        Ok(())
    }
}
