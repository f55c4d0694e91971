use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat_id::ChatId;
use crate::models::Message;

/// Events published on a chat's delivery topic and surfaced to SSE
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DeliveryEvent {
    /// A new message was appended to the chat log.
    Message { message: Message },

    /// A message was soft-deleted; subscribers should blank it locally.
    MessageDeleted { id: Uuid, chat_id: ChatId },
}

impl DeliveryEvent {
    /// SSE event name for this variant.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::MessageDeleted { .. } => "deleted",
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        match self {
            Self::Message { message } => &message.chat_id,
            Self::MessageDeleted { chat_id, .. } => chat_id,
        }
    }
}
