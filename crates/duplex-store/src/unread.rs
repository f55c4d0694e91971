use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use duplex_types::ChatId;
use duplex_types::models::Message;

use crate::keys;
use crate::kv::{KvStore, StoreError};

/// Per-recipient unread counters, one hash field per chat.
///
/// The counter is a cache of "messages logged since last read". It can
/// undercount when the increment after an append fails; [`Self::reconcile`]
/// recomputes it from the log against the recipient's last-read watermark.
#[derive(Clone)]
pub struct UnreadCounter {
    store: Arc<dyn KvStore>,
}

impl UnreadCounter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn increment(&self, recipient: &str, chat_id: &ChatId) -> Result<i64, StoreError> {
        self.store
            .hash_incr(&keys::user_unread(recipient), chat_id.as_str(), 1)
            .await
    }

    /// Reset the chat's counter to zero and advance the recipient's
    /// last-read watermark for it.
    pub async fn reset(&self, recipient: &str, chat_id: &ChatId) -> Result<(), StoreError> {
        self.store
            .hash_del(&keys::user_unread(recipient), chat_id.as_str())
            .await?;
        self.store
            .hash_set(
                &keys::user_lastread(recipient),
                chat_id.as_str(),
                Utc::now().timestamp_millis().to_string(),
            )
            .await
    }

    /// Unread counts keyed by chat id. Absent chats mean zero. Fields that
    /// fail to parse are treated as zero rather than failing the view.
    pub async fn get_all(&self, recipient: &str) -> Result<HashMap<String, u64>, StoreError> {
        let raw = self.store.hash_get_all(&keys::user_unread(recipient)).await?;
        let mut counts = HashMap::with_capacity(raw.len());
        for (chat, value) in raw {
            match value.parse::<u64>() {
                Ok(n) if n > 0 => {
                    counts.insert(chat, n);
                }
                Ok(_) => {}
                Err(_) => warn!(recipient, chat, "unparseable unread field {value:?}"),
            }
        }
        Ok(counts)
    }

    pub async fn last_read(
        &self,
        recipient: &str,
        chat_id: &ChatId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let raw = self
            .store
            .hash_get(&keys::user_lastread(recipient), chat_id.as_str())
            .await?;
        Ok(raw
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis))
    }

    /// Recompute the counter from the chat log: messages authored by the
    /// other participant with a timestamp past the recipient's last-read
    /// watermark. Overwrites the hash field, repairing any missed
    /// increments. Returns the recomputed count.
    pub async fn reconcile(
        &self,
        recipient: &str,
        chat_id: &ChatId,
        log: &[Message],
    ) -> Result<u64, StoreError> {
        let last_read = self.last_read(recipient, chat_id).await?;
        let count = log
            .iter()
            .filter(|m| m.author != recipient)
            .filter(|m| last_read.is_none_or(|cutoff| m.timestamp > cutoff))
            .count() as u64;

        let key = keys::user_unread(recipient);
        if count == 0 {
            self.store.hash_del(&key, chat_id.as_str()).await?;
        } else {
            self.store
                .hash_set(&key, chat_id.as_str(), count.to_string())
                .await?;
        }

        debug!(recipient, chat = %chat_id, count, "unread reconciled");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::messages::MessageStore;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn chat_ab() -> ChatId {
        ChatId::resolve("alice", "bob").unwrap()
    }

    fn message_at(chat_id: &ChatId, author: &str, secs: i64) -> Message {
        Message {
            id: Uuid::now_v7(),
            chat_id: chat_id.clone(),
            author: author.to_string(),
            text: "x".to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn increment_and_reset_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let unread = UnreadCounter::new(store);
        let chat_id = chat_ab();

        unread.increment("bob", &chat_id).await.unwrap();
        unread.increment("bob", &chat_id).await.unwrap();
        assert_eq!(
            unread.get_all("bob").await.unwrap().get(chat_id.as_str()),
            Some(&2)
        );

        unread.reset("bob", &chat_id).await.unwrap();
        assert!(unread.get_all("bob").await.unwrap().is_empty());
        assert!(unread.last_read("bob", &chat_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reconcile_repairs_missed_increment() {
        let store = Arc::new(MemoryStore::new());
        let messages = MessageStore::new(store.clone());
        let unread = UnreadCounter::new(store.clone());
        let chat_id = chat_ab();
        messages.get_or_create_chat(&chat_id).await.unwrap();

        messages.append(&message_at(&chat_id, "alice", 100)).await.unwrap();
        messages.append(&message_at(&chat_id, "alice", 200)).await.unwrap();

        // Simulate a lost increment
        store
            .hash_set("user:bob:unread", chat_id.as_str(), "1".to_string())
            .await
            .unwrap();

        let log = messages.list(&chat_id).await;
        let count = unread.reconcile("bob", &chat_id, &log).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            unread.get_all("bob").await.unwrap().get(chat_id.as_str()),
            Some(&2)
        );
    }

    #[tokio::test]
    async fn reconcile_respects_last_read_watermark() {
        let store = Arc::new(MemoryStore::new());
        let messages = MessageStore::new(store.clone());
        let unread = UnreadCounter::new(store);
        let chat_id = chat_ab();
        messages.get_or_create_chat(&chat_id).await.unwrap();

        messages.append(&message_at(&chat_id, "alice", 100)).await.unwrap();
        unread.reset("bob", &chat_id).await.unwrap();

        // Everything before the watermark counts as read
        let log = messages.list(&chat_id).await;
        assert_eq!(unread.reconcile("bob", &chat_id, &log).await.unwrap(), 0);

        // Bob's own messages never count against him, even past the watermark
        let mut own = message_at(&chat_id, "bob", 0);
        own.timestamp = Utc::now() + chrono::Duration::hours(1);
        messages.append(&own).await.unwrap();
        let log = messages.list(&chat_id).await;
        assert_eq!(unread.reconcile("bob", &chat_id, &log).await.unwrap(), 0);
    }
}
