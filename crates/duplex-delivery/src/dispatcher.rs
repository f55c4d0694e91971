use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::trace;

use duplex_types::ChatId;
use duplex_types::events::DeliveryEvent;

/// Buffered events per topic before slow subscribers start lagging.
/// A lagging subscriber resyncs from the log, so losing events here is
/// recoverable.
const TOPIC_CAPACITY: usize = 256;

/// In-process pub/sub: one broadcast topic per chat id.
///
/// This is the primary delivery path. The store remains the source of
/// truth — subscribers replay the log on connect and resync from it when
/// they lag, so a missed broadcast never loses a message.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    topics: RwLock<HashMap<ChatId, broadcast::Sender<DeliveryEvent>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to a chat's topic, creating it on first use.
    pub async fn subscribe(&self, chat_id: &ChatId) -> broadcast::Receiver<DeliveryEvent> {
        let mut topics = self.inner.topics.write().await;
        topics
            .entry(chat_id.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to its chat's topic. A topic with no remaining
    /// subscribers is pruned so the map does not grow with dead chats.
    pub async fn publish(&self, event: DeliveryEvent) {
        let chat_id = event.chat_id().clone();

        let delivered = {
            let topics = self.inner.topics.read().await;
            match topics.get(&chat_id) {
                Some(tx) => tx.send(event).is_ok(),
                None => return,
            }
        };

        if !delivered {
            trace!(chat = %chat_id, "pruning topic with no subscribers");
            let mut topics = self.inner.topics.write().await;
            if topics
                .get(&chat_id)
                .is_some_and(|tx| tx.receiver_count() == 0)
            {
                topics.remove(&chat_id);
            }
        }
    }

    pub async fn topic_count(&self) -> usize {
        self.inner.topics.read().await.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use duplex_types::models::Message;
    use uuid::Uuid;

    fn event_for(chat_id: &ChatId) -> DeliveryEvent {
        DeliveryEvent::Message {
            message: Message {
                id: Uuid::now_v7(),
                chat_id: chat_id.clone(),
                author: "alice".to_string(),
                text: "hi".to_string(),
                timestamp: Utc::now(),
                deleted: false,
            },
        }
    }

    #[tokio::test]
    async fn publish_reaches_only_that_chats_subscribers() {
        let dispatcher = Dispatcher::new();
        let ab = ChatId::resolve("alice", "bob").unwrap();
        let cd = ChatId::resolve("carol", "dave").unwrap();

        let mut rx_ab = dispatcher.subscribe(&ab).await;
        let mut rx_cd = dispatcher.subscribe(&cd).await;

        dispatcher.publish(event_for(&ab)).await;

        let received = rx_ab.recv().await.unwrap();
        assert_eq!(received.chat_id(), &ab);
        assert!(rx_cd.try_recv().is_err());
    }

    #[tokio::test]
    async fn topic_is_pruned_after_last_subscriber_leaves() {
        let dispatcher = Dispatcher::new();
        let ab = ChatId::resolve("alice", "bob").unwrap();

        let rx = dispatcher.subscribe(&ab).await;
        assert_eq!(dispatcher.topic_count().await, 1);
        drop(rx);

        dispatcher.publish(event_for(&ab)).await;
        assert_eq!(dispatcher.topic_count().await, 0);
    }
}
