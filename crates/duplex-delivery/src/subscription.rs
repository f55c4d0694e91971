use std::collections::HashSet;
use std::time::Duration;

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use duplex_store::MessageStore;
use duplex_types::ChatId;
use duplex_types::events::DeliveryEvent;

use crate::dispatcher::Dispatcher;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// How often to re-read the log as a fallback for events the pub/sub
    /// path missed (other server instances, lagged topics).
    pub resync_interval: Duration,
    /// Hard cap on subscription lifetime. Clients reconnect and replay.
    pub idle_ceiling: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(5),
            idle_ceiling: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Streaming,
    Closed,
}

/// Tracks the subscription lifecycle `Connecting -> Streaming -> Closed`.
/// `Closed` is terminal and entered exactly once; the Drop impl covers the
/// client-disconnect path, where the stream is dropped mid-await.
struct Lifecycle {
    chat_id: ChatId,
    subscriber: String,
    phase: Phase,
}

impl Lifecycle {
    fn new(chat_id: ChatId, subscriber: String) -> Self {
        debug!(chat = %chat_id, subscriber, "subscription connecting");
        Self {
            chat_id,
            subscriber,
            phase: Phase::Connecting,
        }
    }

    fn streaming(&mut self, backlog: usize) {
        self.phase = Phase::Streaming;
        debug!(
            chat = %self.chat_id,
            subscriber = %self.subscriber,
            backlog,
            "backlog replayed, streaming live"
        );
    }

    fn close(&mut self, reason: &str) {
        if self.phase != Phase::Closed {
            self.phase = Phase::Closed;
            info!(
                chat = %self.chat_id,
                subscriber = %self.subscriber,
                reason,
                "subscription closed"
            );
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.close("client disconnected");
    }
}

/// One delivery subscription for (subscriber, chat).
///
/// Replays the full backlog in ascending timestamp order, then streams
/// live events from the chat's pub/sub topic. A resync timer re-reads the
/// log to pick up anything pub/sub missed. Every surfaced message id is
/// remembered for the life of the subscription, so no message is emitted
/// twice across the backlog and live phases; the watermark only moves
/// forward, so timestamps are non-decreasing.
///
/// SSE keepalives are the transport's concern and layered on by the server.
pub fn subscribe(
    messages: MessageStore,
    dispatcher: Dispatcher,
    chat_id: ChatId,
    subscriber: String,
    config: SubscriptionConfig,
) -> impl Stream<Item = DeliveryEvent> + Send {
    stream! {
        let mut lifecycle = Lifecycle::new(chat_id.clone(), subscriber);

        // Register on the topic before reading the backlog so nothing can
        // land in the gap between replay and the live phase.
        let mut rx = dispatcher.subscribe(&chat_id).await;

        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut watermark: Option<DateTime<Utc>> = None;

        for message in messages.list(&chat_id).await {
            seen.insert(message.id);
            if watermark.is_none_or(|w| message.timestamp > w) {
                watermark = Some(message.timestamp);
            }
            yield DeliveryEvent::Message { message };
        }
        lifecycle.streaming(seen.len());

        let mut resync = tokio::time::interval(config.resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        resync.tick().await; // the first tick completes immediately

        let deadline = tokio::time::sleep(config.idle_ceiling);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    lifecycle.close("idle ceiling reached");
                    break;
                }
                result = rx.recv() => match result {
                    Ok(event) => {
                        if let DeliveryEvent::Message { message } = &event {
                            if !seen.insert(message.id) {
                                continue;
                            }
                            if watermark.is_none_or(|w| message.timestamp > w) {
                                watermark = Some(message.timestamp);
                            }
                        }
                        yield event;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(chat = %chat_id, lagged = n, "subscriber lagged, resyncing from log");
                        for event in catch_up(&messages, &chat_id, &mut seen, &mut watermark).await {
                            yield event;
                        }
                    }
                    Err(RecvError::Closed) => {
                        lifecycle.close("topic closed");
                        break;
                    }
                },
                _ = resync.tick() => {
                    for event in catch_up(&messages, &chat_id, &mut seen, &mut watermark).await {
                        yield event;
                    }
                }
            }
        }
    }
}

/// Re-read the log and collect messages past the watermark that have not
/// been surfaced yet. The log comes back ascending, so emission order and
/// the watermark stay monotonic.
async fn catch_up(
    messages: &MessageStore,
    chat_id: &ChatId,
    seen: &mut HashSet<Uuid>,
    watermark: &mut Option<DateTime<Utc>>,
) -> Vec<DeliveryEvent> {
    let mut fresh = Vec::new();
    for message in messages.list(chat_id).await {
        if watermark.is_some_and(|w| message.timestamp <= w) {
            continue;
        }
        if !seen.insert(message.id) {
            continue;
        }
        *watermark = Some(message.timestamp);
        fresh.push(DeliveryEvent::Message { message });
    }
    fresh
}
