pub mod folders;
pub mod kv;
pub mod messages;
pub mod redis_store;
pub mod unread;
pub mod users;

pub use kv::{KvStore, MemoryStore, StoreError, get_json, set_json};
pub use redis_store::RedisStore;

pub use folders::FolderIndex;
pub use messages::{MessageStore, SoftDeleteOutcome};
pub use unread::UnreadCounter;
pub use users::UserStore;

/// Key schema shared by all repositories. Mirrors the layout of a flat
/// Redis namespace: every key is a single atomic unit.
pub(crate) mod keys {
    use duplex_types::ChatId;
    use uuid::Uuid;

    pub fn user(username: &str) -> String {
        format!("user:{username}")
    }

    pub fn user_chats(username: &str) -> String {
        format!("user:{username}:chats")
    }

    pub fn user_unread(username: &str) -> String {
        format!("user:{username}:unread")
    }

    pub fn user_lastread(username: &str) -> String {
        format!("user:{username}:lastread")
    }

    pub fn user_folders(username: &str) -> String {
        format!("user:{username}:folders")
    }

    pub fn chat(chat_id: &ChatId) -> String {
        format!("chat:{chat_id}")
    }

    pub fn chat_messages(chat_id: &ChatId) -> String {
        format!("chat:{chat_id}:messages")
    }

    pub fn message(id: Uuid) -> String {
        format!("message:{id}")
    }

    pub fn folder(folder_id: &str) -> String {
        format!("folder:{folder_id}")
    }

    pub fn folder_chats(folder_id: &str) -> String {
        format!("folder:{folder_id}:chats")
    }
}
