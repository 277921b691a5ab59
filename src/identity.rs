use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::models::{ConversationId, ConversationRef, NewConversation};
use crate::store::PersistenceService;

const DEFAULT_TITLE: &str = "Nouvelle conversation";
const ELLIPSIS: char = '…';

/// Settles the durable conversation id a send will stream into.
///
/// A local placeholder is bound to exactly one durable id: the first send
/// carrying it creates the conversation, concurrent and later sends with the
/// same placeholder wait for and reuse that id.
#[derive(Clone)]
pub struct ConversationResolver {
    store: Arc<dyn PersistenceService>,
    title_max_chars: usize,
    settled: Arc<Mutex<HashMap<String, Arc<OnceCell<ConversationId>>>>>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn PersistenceService>, title_max_chars: usize) -> Self {
        Self {
            store,
            title_max_chars,
            settled: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a durable id unchanged. `None` always creates a conversation
    /// titled after `first_message_text`; a `Local` placeholder creates one
    /// only the first time it is seen.
    pub async fn resolve(
        &self,
        conversation: Option<&ConversationRef>,
        first_message_text: &str,
    ) -> Result<ConversationId, AppError> {
        match conversation {
            Some(ConversationRef::Durable(id)) => Ok(id.clone()),
            None => self.create(first_message_text).await,
            Some(ConversationRef::Local(placeholder)) => {
                let cell = self.settled.lock().entry(placeholder.clone()).or_default().clone();
                let id = cell.get_or_try_init(|| self.create(first_message_text)).await?;
                debug!("Placeholder {placeholder} settled as conversation {id}");
                Ok(id.clone())
            }
        }
    }

    /// Durable id already bound to `placeholder`, if its creation finished.
    pub fn settled_id(&self, placeholder: &str) -> Option<ConversationId> {
        self.settled.lock().get(placeholder).and_then(|cell| cell.get().cloned())
    }

    async fn create(&self, first_message_text: &str) -> Result<ConversationId, AppError> {
        let title = make_title(first_message_text, self.title_max_chars);
        let id = self
            .store
            .create_conversation(NewConversation::new(title.clone(), first_message_text))
            .await?;
        info!("Created conversation {id} titled '{title}'");
        Ok(id)
    }
}

/// Sidebar title: trimmed text cut to `max_chars` characters, with an
/// ellipsis when something was cut.
pub fn make_title(text: &str, max_chars: usize) -> String {
    let t = text.trim();
    if t.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if t.chars().count() > max_chars {
        let mut title: String = t.chars().take(max_chars).collect();
        title.push(ELLIPSIS);
        title
    } else {
        t.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPersistence;

    #[test]
    fn titles_are_truncated_on_char_boundaries() {
        assert_eq!(make_title("  court  ", 10), "court");
        assert_eq!(make_title("éééééééééé", 10), "éééééééééé");
        assert_eq!(make_title("ééééééééééé", 10), "éééééééééé…");
        assert_eq!(make_title("   ", 10), "Nouvelle conversation");
    }

    #[tokio::test]
    async fn durable_ids_pass_through() {
        let store = Arc::new(InMemoryPersistence::new());
        let resolver = ConversationResolver::new(store.clone(), 60);
        let existing = ConversationRef::durable("abc");
        let id = resolver.resolve(Some(&existing), "hello").await.unwrap();
        assert_eq!(id.as_str(), "abc");
        assert!(store.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_new_conversation_gets_its_own_id() {
        let store = Arc::new(InMemoryPersistence::new());
        let resolver = ConversationResolver::new(store.clone(), 60);
        let a = resolver.resolve(None, "même texte").await.unwrap();
        let b = resolver.resolve(None, "même texte").await.unwrap();
        assert_ne!(a, b);

        assert_eq!(store.list_conversations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn local_placeholder_settles_once() {
        let store = Arc::new(InMemoryPersistence::new());
        let resolver = ConversationResolver::new(store.clone(), 60);
        let local = ConversationRef::Local("tmp-1".into());
        assert!(resolver.settled_id("tmp-1").is_none());

        let (a, b) = tokio::join!(
            resolver.resolve(Some(&local), "premier"),
            resolver.resolve(Some(&local), "second"),
        );
        let a = a.unwrap();
        assert_eq!(a, b.unwrap());
        let later = resolver.resolve(Some(&local), "troisième").await.unwrap();
        assert_eq!(later, a);
        assert_eq!(resolver.settled_id("tmp-1"), Some(a.clone()));

        let other = resolver
            .resolve(Some(&ConversationRef::Local("tmp-2".into())), "autre")
            .await
            .unwrap();
        assert_ne!(other, a);
        assert_eq!(store.list_conversations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_creation_leaves_the_placeholder_unsettled() {
        use crate::models::{ConversationSummary, Message, Sender};
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Refuses the first creation, then delegates.
        #[derive(Default)]
        struct RefuseOnce {
            inner: InMemoryPersistence,
            calls: AtomicUsize,
        }

        #[async_trait]
        impl PersistenceService for RefuseOnce {
            async fn create_conversation(&self, meta: NewConversation) -> Result<ConversationId, AppError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(AppError::persistence("unavailable"));
                }
                self.inner.create_conversation(meta).await
            }
            async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
                self.inner.list_conversations().await
            }
            async fn delete_conversation(&self, id: &ConversationId) -> Result<(), AppError> {
                self.inner.delete_conversation(id).await
            }
            async fn append_message(&self, id: &ConversationId, sender: Sender, text: &str) -> Result<(), AppError> {
                self.inner.append_message(id, sender, text).await
            }
            async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, AppError> {
                self.inner.list_messages(id).await
            }
        }

        let resolver = ConversationResolver::new(Arc::new(RefuseOnce::default()), 60);
        let local = ConversationRef::Local("tmp-1".into());
        assert!(resolver.resolve(Some(&local), "x").await.is_err());
        assert!(resolver.settled_id("tmp-1").is_none());
        assert!(resolver.resolve(Some(&local), "x").await.is_ok());
    }
}
