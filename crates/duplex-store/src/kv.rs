use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Network-level failure talking to the backing store. Reads may be
    /// retried; writes are surfaced to the caller instead.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// A record exists but cannot be decoded.
    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Flat key-value store offering atomic single-key operations only — no
/// multi-key transactions, no change feeds. All values are strings; record
/// types are stored as JSON via [`get_json`] / [`set_json`].
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Append to the tail of a list.
    async fn list_push(&self, key: &str, entry: String) -> Result<(), StoreError>;
    /// Full contents of a list, in append order.
    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Atomic increment of a hash field; returns the new value.
    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError>;
    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<(), StoreError>;
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hash_del(&self, key: &str, field: &str) -> Result<(), StoreError>;
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// All keys starting with `prefix`. Used only by user search.
    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.set(key, raw).await
}

/// In-memory store for tests and single-node development. Matches the
/// Redis backend operation for operation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    blobs: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().await.blobs.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.inner.write().await.blobs.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.write().await.blobs.remove(key);
        Ok(())
    }

    async fn list_push(&self, key: &str, entry: String) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .lists
            .entry(key.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .lists
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(set) = self.inner.write().await.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        let current = hash
            .get(field)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + by;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<(), StoreError> {
        if let Some(hash) = self.inner.write().await.hashes.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let mut keys: Vec<String> = inner
            .blobs
            .keys()
            .chain(inner.lists.keys())
            .chain(inner.sets.keys())
            .chain(inner.hashes.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Test double that fails the first N calls of every operation with a
/// transient error, then delegates to an inner [`MemoryStore`].
#[cfg(test)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    failures_left: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FlakyStore {
    pub(crate) fn new(inner: MemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures_left: std::sync::atomic::AtomicUsize::new(failures),
        }
    }

    fn should_fail(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[cfg(test)]
#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.should_fail() {
            return Err(StoreError::Transient("injected".into()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        if self.should_fail() {
            return Err(StoreError::Transient("injected".into()));
        }
        self.inner.set(key, value).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key).await
    }

    async fn list_push(&self, key: &str, entry: String) -> Result<(), StoreError> {
        self.inner.list_push(key, entry).await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        if self.should_fail() {
            return Err(StoreError::Transient("injected".into()));
        }
        self.inner.list_range(key).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.inner.set_members(key).await
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        if self.should_fail() {
            return Err(StoreError::Transient("injected".into()));
        }
        self.inner.hash_incr(key, field, by).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        self.inner.hash_set(key, field, value).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.inner.hash_get(key, field).await
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<(), StoreError> {
        self.inner.hash_del(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.inner.hash_get_all(key).await
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.scan_keys(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_incr_starts_from_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.hash_incr("h", "f", 1).await.unwrap(), 1);
        assert_eq!(store.hash_incr("h", "f", 1).await.unwrap(), 2);
        store.hash_del("h", "f").await.unwrap();
        assert_eq!(store.hash_incr("h", "f", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_preserves_append_order() {
        let store = MemoryStore::new();
        for entry in ["a", "b", "c"] {
            store.list_push("l", entry.to_string()).await.unwrap();
        }
        assert_eq!(store.list_range("l").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn flaky_store_recovers_after_failures() {
        let flaky = FlakyStore::new(MemoryStore::new(), 2);
        assert!(flaky.get("k").await.is_err());
        assert!(flaky.get("k").await.is_err());
        assert!(flaky.get("k").await.unwrap().is_none());
    }
}
