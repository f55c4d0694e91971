use std::sync::Arc;

use duplex_types::models::User;

use crate::keys;
use crate::kv::{KvStore, StoreError, get_json, set_json};

/// Profile fields a user may change. `None` leaves the field as-is.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub emoji: Option<String>,
}

/// User records keyed by username. Users are never hard-deleted.
#[derive(Clone)]
pub struct UserStore {
    store: Arc<dyn KvStore>,
}

impl UserStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, username: &str) -> Result<Option<User>, StoreError> {
        get_json(self.store.as_ref(), &keys::user(username)).await
    }

    pub async fn create(&self, user: &User) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), &keys::user(&user.username), user).await
    }

    pub async fn update_profile(
        &self,
        username: &str,
        update: ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        let Some(mut user) = self.get(username).await? else {
            return Ok(None);
        };

        if let Some(display_name) = update.display_name {
            user.display_name = Some(display_name);
        }
        if let Some(bio) = update.bio {
            user.bio = Some(bio);
        }
        if let Some(photo_url) = update.photo_url {
            user.photo_url = Some(photo_url);
        }
        if let Some(emoji) = update.emoji {
            user.emoji = Some(emoji);
        }

        self.create(&user).await?;
        Ok(Some(user))
    }

    /// Case-insensitive substring search over usernames, excluding the
    /// caller, capped at 10 results. Scans the user keyspace, so it is fine
    /// for the small deployments this serves and nothing bigger.
    pub async fn search(&self, query: &str, exclude: &str) -> Result<Vec<String>, StoreError> {
        let needle = query.to_lowercase();
        let keys = self.store.scan_keys("user:").await?;

        let mut usernames: Vec<String> = keys
            .into_iter()
            .filter_map(|key| {
                let rest = key.strip_prefix("user:")?;
                // Skip sub-keys like user:{name}:chats
                if rest.contains(':') {
                    return None;
                }
                Some(rest.to_string())
            })
            .filter(|name| name != exclude && name.to_lowercase().contains(&needle))
            .collect();

        usernames.sort();
        usernames.truncate(10);
        Ok(usernames)
    }

    /// Every registered username. Used by the unread reconciler.
    pub async fn all_usernames(&self) -> Result<Vec<String>, StoreError> {
        let keys = self.store.scan_keys("user:").await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let rest = key.strip_prefix("user:")?;
                if rest.contains(':') {
                    return None;
                }
                Some(rest.to_string())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use chrono::Utc;

    fn user(name: &str) -> User {
        User {
            username: name.to_string(),
            password: "hash".to_string(),
            created_at: Utc::now(),
            display_name: None,
            bio: None,
            photo_url: None,
            emoji: None,
        }
    }

    #[tokio::test]
    async fn update_profile_merges_fields() {
        let users = UserStore::new(Arc::new(MemoryStore::new()));
        users.create(&user("alice")).await.unwrap();

        users
            .update_profile(
                "alice",
                ProfileUpdate {
                    bio: Some("hi".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let updated = users
            .update_profile(
                "alice",
                ProfileUpdate {
                    display_name: Some("Alice".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        // Earlier fields survive later partial updates
        assert_eq!(updated.bio.as_deref(), Some("hi"));
        assert_eq!(updated.display_name.as_deref(), Some("Alice"));

        assert!(users
            .update_profile("nobody", ProfileUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn search_skips_sub_keys_and_caller() {
        let store = Arc::new(MemoryStore::new());
        let users = UserStore::new(store.clone());
        users.create(&user("alice")).await.unwrap();
        users.create(&user("alina")).await.unwrap();
        users.create(&user("bob")).await.unwrap();
        store.set_add("user:alice:chats", "alice:bob").await.unwrap();

        let hits = users.search("ali", "alice").await.unwrap();
        assert_eq!(hits, vec!["alina"]);

        let all = users.search("al", "bob").await.unwrap();
        assert_eq!(all, vec!["alice", "alina"]);
    }
}
