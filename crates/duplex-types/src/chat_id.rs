use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the two participant usernames in a chat id.
/// Usernames are validated at registration and can never contain it.
const SEPARATOR: char = ':';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatIdError {
    #[error("cannot open a chat with yourself")]
    SelfChat,
    #[error("invalid username: {0}")]
    InvalidUsername(String),
}

/// Canonical id for a two-party chat: the two usernames sorted bytewise
/// and joined with `:`. `resolve(a, b) == resolve(b, a)` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn resolve(a: &str, b: &str) -> Result<Self, ChatIdError> {
        if !is_valid_username(a) {
            return Err(ChatIdError::InvalidUsername(a.to_string()));
        }
        if !is_valid_username(b) {
            return Err(ChatIdError::InvalidUsername(b.to_string()));
        }
        if a == b {
            return Err(ChatIdError::SelfChat);
        }

        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Ok(Self(format!("{lo}{SEPARATOR}{hi}")))
    }

    /// Rebuild a ChatId from its stored string form. Callers own the
    /// guarantee that the string came from `resolve` originally.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn participants(&self) -> (&str, &str) {
        // resolve() always produces exactly one separator
        self.0.split_once(SEPARATOR).unwrap_or((&self.0, ""))
    }

    /// The participant that is not `me`, if `me` is part of this chat.
    pub fn other_participant(&self, me: &str) -> Option<&str> {
        let (a, b) = self.participants();
        if a == me {
            Some(b)
        } else if b == me {
            Some(a)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Usernames are 3-32 chars of `[A-Za-z0-9_]`. This keeps the chat id
/// separator unambiguous and matches the registration validation.
pub fn is_valid_username(name: &str) -> bool {
    name.len() >= 3
        && name.len() <= 32
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
