use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use duplex_types::ChatId;
use duplex_types::models::Folder;

use crate::keys;
use crate::kv::{KvStore, StoreError, get_json, set_json};

/// User-defined folders for organizing chats. Pure bookkeeping — never on
/// the message delivery path.
#[derive(Clone)]
pub struct FolderIndex {
    store: Arc<dyn KvStore>,
}

impl FolderIndex {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, owner: &str, name: &str) -> Result<Folder, StoreError> {
        let folder = Folder {
            id: format!("{owner}:{}", Uuid::new_v4()),
            name: name.trim().to_string(),
            owner: owner.to_string(),
            created_at: Utc::now(),
        };

        set_json(self.store.as_ref(), &keys::folder(&folder.id), &folder).await?;
        self.store
            .set_add(&keys::user_folders(owner), &folder.id)
            .await?;

        debug!(owner, folder = %folder.id, "folder created");
        Ok(folder)
    }

    /// Returns false if the folder does not exist or is not owned by the
    /// requester; the folder is left untouched in that case.
    pub async fn delete(&self, owner: &str, folder_id: &str) -> Result<bool, StoreError> {
        let Some(folder) = self.get(folder_id).await? else {
            return Ok(false);
        };
        if folder.owner != owner {
            return Ok(false);
        }

        self.store.del(&keys::folder(folder_id)).await?;
        self.store.del(&keys::folder_chats(folder_id)).await?;
        self.store
            .set_remove(&keys::user_folders(owner), folder_id)
            .await?;
        Ok(true)
    }

    pub async fn get(&self, folder_id: &str) -> Result<Option<Folder>, StoreError> {
        get_json(self.store.as_ref(), &keys::folder(folder_id)).await
    }

    /// Put a chat into a folder. A chat lives in at most one folder per
    /// user, so it is first removed from the owner's other folders.
    /// Returns false if the folder is missing or owned by someone else.
    pub async fn assign(
        &self,
        owner: &str,
        folder_id: &str,
        chat_id: &ChatId,
    ) -> Result<bool, StoreError> {
        let Some(folder) = self.get(folder_id).await? else {
            return Ok(false);
        };
        if folder.owner != owner {
            return Ok(false);
        }

        for other in self.store.set_members(&keys::user_folders(owner)).await? {
            if other != folder_id {
                self.unassign(&other, chat_id).await?;
            }
        }

        self.store
            .set_add(&keys::folder_chats(folder_id), chat_id.as_str())
            .await?;
        Ok(true)
    }

    pub async fn unassign(&self, folder_id: &str, chat_id: &ChatId) -> Result<(), StoreError> {
        self.store
            .set_remove(&keys::folder_chats(folder_id), chat_id.as_str())
            .await
    }

    pub async fn list_for_user(&self, owner: &str) -> Result<Vec<Folder>, StoreError> {
        let ids = self.store.set_members(&keys::user_folders(owner)).await?;
        let mut folders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(folder) = self.get(&id).await? {
                folders.push(folder);
            }
        }
        Ok(folders)
    }

    pub async fn chats_in(&self, folder_id: &str) -> Result<Vec<String>, StoreError> {
        self.store.set_members(&keys::folder_chats(folder_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[tokio::test]
    async fn delete_is_owner_only() {
        let folders = FolderIndex::new(Arc::new(MemoryStore::new()));
        let folder = folders.create("carol", "Work").await.unwrap();

        assert!(!folders.delete("mallory", &folder.id).await.unwrap());
        assert!(folders.get(&folder.id).await.unwrap().is_some());

        assert!(folders.delete("carol", &folder.id).await.unwrap());
        assert!(folders.get(&folder.id).await.unwrap().is_none());
        assert!(folders.list_for_user("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn assign_moves_chat_between_folders() {
        let folders = FolderIndex::new(Arc::new(MemoryStore::new()));
        let f1 = folders.create("carol", "Work").await.unwrap();
        let f2 = folders.create("carol", "Friends").await.unwrap();
        let chat_id = ChatId::resolve("carol", "dave").unwrap();

        assert!(folders.assign("carol", &f1.id, &chat_id).await.unwrap());
        assert_eq!(folders.chats_in(&f1.id).await.unwrap(), vec![chat_id.as_str()]);

        // Assigning to the second folder removes it from the first
        assert!(folders.assign("carol", &f2.id, &chat_id).await.unwrap());
        assert!(folders.chats_in(&f1.id).await.unwrap().is_empty());
        assert_eq!(folders.chats_in(&f2.id).await.unwrap(), vec![chat_id.as_str()]);
    }

    #[tokio::test]
    async fn assign_rejects_foreign_folder() {
        let folders = FolderIndex::new(Arc::new(MemoryStore::new()));
        let folder = folders.create("carol", "Work").await.unwrap();
        let chat_id = ChatId::resolve("eve_1", "dave").unwrap();

        assert!(!folders.assign("eve_1", &folder.id, &chat_id).await.unwrap());
        assert!(folders.chats_in(&folder.id).await.unwrap().is_empty());
    }
}
