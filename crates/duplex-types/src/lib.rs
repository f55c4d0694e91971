pub mod api;
pub mod chat_id;
pub mod events;
pub mod models;

pub use chat_id::ChatId;
