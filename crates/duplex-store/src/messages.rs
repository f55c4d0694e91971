use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use duplex_types::ChatId;
use duplex_types::models::{Chat, DELETED_TEXT, LastMessage, Message};

use crate::keys;
use crate::kv::{KvStore, StoreError, get_json, set_json};
use crate::unread::UnreadCounter;

const LIST_ATTEMPTS: u32 = 3;
const LIST_BACKOFF_BASE: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum SoftDeleteOutcome {
    /// The updated message, with placeholder text and the deleted flag set.
    Deleted(Message),
    NotFound,
    NotAuthor,
}

/// Per-chat ordered message log over the key-value store.
///
/// A message lives in two places: the `message:{id}` record (source of
/// truth, mutated by soft delete) and the chat's log list, which normally
/// holds bare ids. Logs written by earlier versions of the system may hold
/// inline JSON objects instead; `list` resolves both representations.
#[derive(Clone)]
pub struct MessageStore {
    store: Arc<dyn KvStore>,
    unread: UnreadCounter,
}

/// Build a new message for `author` in `chat_id`. UUIDv7 ids are
/// time-ordered, so id order and timestamp order coincide.
pub fn new_message(chat_id: ChatId, author: &str, text: &str) -> Message {
    Message {
        id: Uuid::now_v7(),
        chat_id,
        author: author.to_string(),
        text: text.trim().to_string(),
        timestamp: Utc::now(),
        deleted: false,
    }
}

impl MessageStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            unread: UnreadCounter::new(store.clone()),
            store,
        }
    }

    /// Fetch the chat record, creating it lazily on first contact. Creation
    /// is idempotent by id, so concurrent first sends between the same pair
    /// resolve to last-writer-wins on an identical record.
    pub async fn get_or_create_chat(&self, chat_id: &ChatId) -> Result<Chat, StoreError> {
        let key = keys::chat(chat_id);
        if let Some(chat) = get_json::<Chat>(self.store.as_ref(), &key).await? {
            return Ok(chat);
        }

        let (a, b) = chat_id.participants();
        let chat = Chat {
            id: chat_id.clone(),
            participants: [a.to_string(), b.to_string()],
            created_at: Utc::now(),
            last_message: None,
        };
        set_json(self.store.as_ref(), &key, &chat).await?;

        self.store.set_add(&keys::user_chats(a), chat_id.as_str()).await?;
        self.store.set_add(&keys::user_chats(b), chat_id.as_str()).await?;

        debug!(chat = %chat_id, "created chat");
        Ok(chat)
    }

    pub async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<Chat>, StoreError> {
        get_json(self.store.as_ref(), &keys::chat(chat_id)).await
    }

    /// Append a message to its chat's log.
    ///
    /// Four single-key writes, not a transaction. The message record goes
    /// first so the log never references a missing record, then the log
    /// push — those two must succeed or the send fails. The snapshot update
    /// and the unread increment come last: if either fails the message is
    /// already durable, so we log and move on (the counter is recomputed
    /// from the log by reconciliation).
    pub async fn append(&self, message: &Message) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), &keys::message(message.id), message).await?;
        self.store
            .list_push(&keys::chat_messages(&message.chat_id), message.id.to_string())
            .await?;

        if let Err(e) = self.update_snapshot(message).await {
            warn!(chat = %message.chat_id, "last-message snapshot update failed: {e}");
        }

        if let Some(recipient) = message.chat_id.other_participant(&message.author) {
            if let Err(e) = self.unread.increment(recipient, &message.chat_id).await {
                warn!(
                    recipient,
                    chat = %message.chat_id,
                    "unread increment failed, will be reconciled from the log: {e}"
                );
            }
        }

        Ok(())
    }

    async fn update_snapshot(&self, message: &Message) -> Result<(), StoreError> {
        let key = keys::chat(&message.chat_id);
        if let Some(mut chat) = get_json::<Chat>(self.store.as_ref(), &key).await? {
            chat.last_message = Some(LastMessage {
                text: message.text.clone(),
                author: message.author.clone(),
                timestamp: message.timestamp,
            });
            set_json(self.store.as_ref(), &key, &chat).await?;
        }
        Ok(())
    }

    /// All messages of a chat, ascending by (timestamp, id). List-append
    /// order is not trusted; near-simultaneous writes may land out of
    /// order, so the log is re-sorted at read time.
    ///
    /// Transient failures are retried with exponential backoff; after the
    /// last attempt this returns an empty log rather than an error.
    pub async fn list(&self, chat_id: &ChatId) -> Vec<Message> {
        for attempt in 0..LIST_ATTEMPTS {
            match self.read_log(chat_id).await {
                Ok(mut messages) => {
                    messages.sort_by(|a, b| {
                        a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id))
                    });
                    return messages;
                }
                Err(e) => {
                    warn!(chat = %chat_id, attempt, "log read failed: {e}");
                    if attempt + 1 < LIST_ATTEMPTS {
                        tokio::time::sleep(LIST_BACKOFF_BASE * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        warn!(chat = %chat_id, "log read exhausted retries, returning empty");
        Vec::new()
    }

    async fn read_log(&self, chat_id: &ChatId) -> Result<Vec<Message>, StoreError> {
        let raw = self.store.list_range(&keys::chat_messages(chat_id)).await?;
        let mut messages = Vec::with_capacity(raw.len());

        for entry in raw {
            match self.resolve_entry(&entry).await? {
                Some(message) => messages.push(message),
                None => warn!(chat = %chat_id, "dangling log entry {entry:?}, skipping"),
            }
        }

        Ok(messages)
    }

    /// A log entry is either a bare message id or an inline JSON object
    /// left by an older writer. For inline entries the `message:{id}`
    /// record still wins when present, so soft deletes stay visible.
    async fn resolve_entry(&self, entry: &str) -> Result<Option<Message>, StoreError> {
        if entry.trim_start().starts_with('{') {
            let inline: Message =
                serde_json::from_str(entry).map_err(|e| StoreError::Corrupt {
                    key: "chat log entry".to_string(),
                    reason: e.to_string(),
                })?;
            let record = get_json::<Message>(self.store.as_ref(), &keys::message(inline.id)).await?;
            return Ok(Some(record.unwrap_or(inline)));
        }

        let id: Uuid = match entry.parse() {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };
        get_json(self.store.as_ref(), &keys::message(id)).await
    }

    /// Replace the message body with a placeholder and flag it deleted.
    /// The log entry keeps its id and position, so clients that already
    /// fetched it stay consistent. Only the author may delete.
    pub async fn soft_delete(
        &self,
        message_id: Uuid,
        requester: &str,
    ) -> Result<SoftDeleteOutcome, StoreError> {
        let key = keys::message(message_id);
        let Some(mut message) = get_json::<Message>(self.store.as_ref(), &key).await? else {
            return Ok(SoftDeleteOutcome::NotFound);
        };

        if message.author != requester {
            return Ok(SoftDeleteOutcome::NotAuthor);
        }

        message.text = DELETED_TEXT.to_string();
        message.deleted = true;
        set_json(self.store.as_ref(), &key, &message).await?;

        debug!(id = %message_id, chat = %message.chat_id, "message soft-deleted");
        Ok(SoftDeleteOutcome::Deleted(message))
    }

    /// Chat records for every chat the user is a member of. Dangling
    /// membership entries are skipped.
    pub async fn chats_for_user(&self, username: &str) -> Result<Vec<Chat>, StoreError> {
        let ids = self.store.set_members(&keys::user_chats(username)).await?;
        let mut chats = Vec::with_capacity(ids.len());
        for id in ids {
            let chat_id = ChatId::from_stored(id);
            if let Some(chat) = self.get_chat(&chat_id).await? {
                chats.push(chat);
            }
        }
        Ok(chats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{FlakyStore, MemoryStore};
    use chrono::TimeZone;

    fn chat_ab() -> ChatId {
        ChatId::resolve("alice", "bob").unwrap()
    }

    fn message_at(chat_id: &ChatId, author: &str, text: &str, secs: i64) -> Message {
        Message {
            id: Uuid::now_v7(),
            chat_id: chat_id.clone(),
            author: author.to_string(),
            text: text.to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_and_registers_membership() {
        let store = Arc::new(MemoryStore::new());
        let messages = MessageStore::new(store.clone());
        let chat_id = chat_ab();

        let first = messages.get_or_create_chat(&chat_id).await.unwrap();
        let second = messages.get_or_create_chat(&chat_id).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.participants, ["alice", "bob"]);

        let alice_chats = store.set_members("user:alice:chats").await.unwrap();
        let bob_chats = store.set_members("user:bob:chats").await.unwrap();
        assert_eq!(alice_chats, vec![chat_id.as_str()]);
        assert_eq!(bob_chats, vec![chat_id.as_str()]);
    }

    #[tokio::test]
    async fn list_sorts_by_timestamp_regardless_of_append_order() {
        let store = Arc::new(MemoryStore::new());
        let messages = MessageStore::new(store);
        let chat_id = chat_ab();
        messages.get_or_create_chat(&chat_id).await.unwrap();

        let late = message_at(&chat_id, "alice", "second", 200);
        let early = message_at(&chat_id, "bob", "first", 100);
        messages.append(&late).await.unwrap();
        messages.append(&early).await.unwrap();

        let log = messages.list(&chat_id).await;
        let texts: Vec<&str> = log.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn list_resolves_mixed_representation_log() {
        let store = Arc::new(MemoryStore::new());
        let messages = MessageStore::new(store.clone());
        let chat_id = chat_ab();
        messages.get_or_create_chat(&chat_id).await.unwrap();

        // Inline JSON entry, the way an older writer stored it
        let inline = message_at(&chat_id, "alice", "inline", 100);
        store
            .list_push(
                &keys::chat_messages(&chat_id),
                serde_json::to_string(&inline).unwrap(),
            )
            .await
            .unwrap();

        // Current representation: bare id with a separate record
        let by_ref = message_at(&chat_id, "bob", "by reference", 200);
        messages.append(&by_ref).await.unwrap();

        let log = messages.list(&chat_id).await;
        let texts: Vec<&str> = log.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["inline", "by reference"]);
    }

    #[tokio::test(start_paused = true)]
    async fn list_retries_transient_failures_then_returns_empty() {
        // Every attempt fails: the read degrades to an empty log
        let always_failing =
            MessageStore::new(Arc::new(FlakyStore::new(MemoryStore::new(), 100)));
        assert!(always_failing.list(&chat_ab()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn list_succeeds_after_transient_failures() {
        let memory = MemoryStore::new();
        let seed = MessageStore::new(Arc::new(memory.clone()));
        let chat_id = chat_ab();
        seed.get_or_create_chat(&chat_id).await.unwrap();
        seed.append(&message_at(&chat_id, "alice", "hi", 100))
            .await
            .unwrap();

        // First two log reads fail, third succeeds within the retry budget
        let flaky = MessageStore::new(Arc::new(FlakyStore::new(memory, 2)));
        let log = flaky.list(&chat_id).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text, "hi");
    }

    #[tokio::test]
    async fn soft_delete_is_author_only_and_preserves_position() {
        let store = Arc::new(MemoryStore::new());
        let messages = MessageStore::new(store);
        let chat_id = chat_ab();
        messages.get_or_create_chat(&chat_id).await.unwrap();

        let first = message_at(&chat_id, "alice", "hello", 100);
        let second = message_at(&chat_id, "bob", "hey", 200);
        messages.append(&first).await.unwrap();
        messages.append(&second).await.unwrap();

        // Non-author is refused
        assert!(matches!(
            messages.soft_delete(first.id, "bob").await.unwrap(),
            SoftDeleteOutcome::NotAuthor
        ));
        assert!(matches!(
            messages.soft_delete(Uuid::now_v7(), "bob").await.unwrap(),
            SoftDeleteOutcome::NotFound
        ));

        // Author delete keeps the entry in place with placeholder text
        assert!(matches!(
            messages.soft_delete(first.id, "alice").await.unwrap(),
            SoftDeleteOutcome::Deleted(_)
        ));

        let log = messages.list(&chat_id).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, first.id);
        assert_eq!(log[0].text, DELETED_TEXT);
        assert!(log[0].deleted);
        assert_eq!(log[1].text, "hey");
    }

    #[tokio::test]
    async fn append_updates_snapshot_and_recipient_unread() {
        let store = Arc::new(MemoryStore::new());
        let messages = MessageStore::new(store.clone());
        let unread = UnreadCounter::new(store.clone());
        let chat_id = chat_ab();
        messages.get_or_create_chat(&chat_id).await.unwrap();

        let msg = message_at(&chat_id, "alice", "hi bob", 100);
        messages.append(&msg).await.unwrap();

        let chat = messages.get_chat(&chat_id).await.unwrap().unwrap();
        let snapshot = chat.last_message.unwrap();
        assert_eq!(snapshot.text, "hi bob");
        assert_eq!(snapshot.author, "alice");

        // Recipient got the unread, sender did not
        let bob = unread.get_all("bob").await.unwrap();
        assert_eq!(bob.get(chat_id.as_str()), Some(&1));
        assert!(unread.get_all("alice").await.unwrap().is_empty());

        // Mark-read brings it back to exactly zero
        unread.reset("bob", &chat_id).await.unwrap();
        assert!(unread.get_all("bob").await.unwrap().is_empty());
    }
}
