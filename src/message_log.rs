use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::models::Message;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Notification sent to subscribers after the log changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChange {
    Appended { id: String },
    Updated { id: String },
    Replaced { id: String },
    /// The whole log was swapped (new or freshly loaded conversation).
    Reset,
    /// A reply completed; sidebars should re-list conversations.
    ConversationsChanged,
}

/// Ordered view of the active conversation, shared between stream sessions
/// and the rendering layer.
///
/// Entries keep insertion order and are never re-sorted. Message ids are
/// unique within the log.
pub struct MessageLog {
    entries: RwLock<Vec<Message>>,
    changes: broadcast::Sender<LogChange>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { entries: RwLock::new(Vec::new()), changes }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogChange> {
        self.changes.subscribe()
    }

    /// Appends `message` unless an entry with the same id already exists.
    pub fn append(&self, message: Message) -> bool {
        let id = message.id.clone();
        {
            let mut entries = self.entries.write();
            if entries.iter().any(|m| m.id == id) {
                return false;
            }
            entries.push(message);
        }
        self.notify(LogChange::Appended { id });
        true
    }

    /// Applies `updater` to the entry with `id`. Missing ids are a no-op.
    pub fn mutate(&self, id: &str, updater: impl FnOnce(&mut Message)) -> bool {
        {
            let mut entries = self.entries.write();
            let Some(entry) = entries.iter_mut().find(|m| m.id == id) else {
                return false;
            };
            updater(entry);
        }
        self.notify(LogChange::Updated { id: id.to_string() });
        true
    }

    /// Swaps the entry with `id` for `message`, keeping its position.
    pub fn replace(&self, id: &str, message: Message) -> bool {
        let new_id = message.id.clone();
        {
            let mut entries = self.entries.write();
            let Some(pos) = entries.iter().position(|m| m.id == id) else {
                return false;
            };
            if new_id != id && entries.iter().any(|m| m.id == new_id) {
                return false;
            }
            entries[pos] = message;
        }
        self.notify(LogChange::Replaced { id: new_id });
        true
    }

    /// Replaces the whole content, dropping later duplicates of an id.
    pub fn reset(&self, messages: Vec<Message>) {
        {
            let mut entries = self.entries.write();
            entries.clear();
            for message in messages {
                if !entries.iter().any(|m| m.id == message.id) {
                    entries.push(message);
                }
            }
        }
        self.notify(LogChange::Reset);
    }

    pub fn clear(&self) {
        self.reset(Vec::new());
    }

    pub fn get(&self, id: &str) -> Option<Message> {
        self.entries.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn notify(&self, change: LogChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;

    #[test]
    fn duplicate_append_is_rejected() {
        let log = MessageLog::new();
        let user = Message::user("bonjour");
        assert!(log.append(user.clone()));
        assert!(!log.append(user.clone()));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn mutate_missing_id_is_noop() {
        let log = MessageLog::new();
        log.append(Message::user("a"));
        let before = log.snapshot();
        assert!(!log.mutate("gone", |m| m.text.push_str("stale")));
        assert_eq!(log.snapshot(), before);
    }

    #[test]
    fn order_is_insertion_order_not_timestamp() {
        let log = MessageLog::new();
        let mut older = Message::user("second");
        older.created_at = chrono::Utc::now() - chrono::Duration::hours(1);
        let newer = Message::user("first");
        log.append(newer.clone());
        log.append(older.clone());
        let ids: Vec<_> = log.snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[test]
    fn replace_keeps_position_and_rejects_id_collisions() {
        let log = MessageLog::new();
        let user = Message::user("q");
        let bot = Message::placeholder();
        log.append(user.clone());
        log.append(bot.clone());

        let mut failed = bot.clone();
        failed.text = "sorry".into();
        assert!(log.replace(&bot.id, failed));
        assert_eq!(log.snapshot()[1].text, "sorry");

        let mut clash = Message::new(Sender::Bot, "x");
        clash.id = user.id.clone();
        assert!(!log.replace(&bot.id, clash));
        assert!(!log.replace("missing", Message::placeholder()));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn reset_deduplicates() {
        let log = MessageLog::new();
        let m = Message::user("x");
        log.reset(vec![m.clone(), m.clone(), Message::user("y")]);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_changes_in_order() {
        let log = MessageLog::new();
        let mut rx = log.subscribe();
        let bot = Message::placeholder();
        log.append(bot.clone());
        log.mutate(&bot.id, |m| m.text = "hi".into());
        log.clear();
        assert_eq!(rx.recv().await.unwrap(), LogChange::Appended { id: bot.id.clone() });
        assert_eq!(rx.recv().await.unwrap(), LogChange::Updated { id: bot.id.clone() });
        assert_eq!(rx.recv().await.unwrap(), LogChange::Reset);
    }
}
