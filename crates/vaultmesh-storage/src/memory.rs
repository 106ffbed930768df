//! In-memory storage backend.
//!
//! Stores all data in a `BTreeMap` behind a `RwLock`. Nothing survives the
//! process, so this backend is meant for tests and throwaway nodes. Batches
//! are applied under a single write guard, which makes them atomic with
//! respect to every other reader and writer.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{BatchOp, StorageBackend, StorageError};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// Clones share the same underlying map.
///
/// # Examples
///
/// ```
/// # use vaultmesh_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("acl/nodes/abc", b"data").await.unwrap();
/// let val = backend.get("acl/nodes/abc").await.unwrap();
/// assert_eq!(val, Some(b"data".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the backend holds no keys at all.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.data
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().await.contains_key(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("acl/nodes/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_existing() {
        let backend = MemoryBackend::new();
        backend.put("key", b"v1").await.unwrap();
        backend.put("key", b"v2").await.unwrap();
        assert_eq!(backend.get("key").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn delete_nonexistent_is_noop() {
        let backend = MemoryBackend::new();
        backend.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn list_stops_at_prefix_boundary() {
        let backend = MemoryBackend::new();
        backend.put("acl/nodes/a", b"1").await.unwrap();
        backend.put("acl/nodes/b", b"2").await.unwrap();
        backend.put("acl/perms/a", b"3").await.unwrap();
        backend.put("vaults/names/x", b"4").await.unwrap();

        let keys = backend.list("acl/nodes/").await.unwrap();
        assert_eq!(keys, vec!["acl/nodes/a", "acl/nodes/b"]);
    }

    #[tokio::test]
    async fn batch_applies_puts_and_deletes_in_order() {
        let backend = MemoryBackend::new();
        backend.put("stale", b"x").await.unwrap();

        backend
            .batch(vec![
                BatchOp::Put {
                    key: "a".to_owned(),
                    value: b"1".to_vec(),
                },
                BatchOp::Delete {
                    key: "stale".to_owned(),
                },
                BatchOp::Put {
                    key: "a".to_owned(),
                    value: b"2".to_vec(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(backend.get("a").await.unwrap(), Some(b"2".to_vec()));
        assert!(!backend.exists("stale").await.unwrap());
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn scan_returns_pairs_under_prefix() {
        let backend = MemoryBackend::new();
        backend.put("vaults/keys/1", b"k1").await.unwrap();
        backend.put("vaults/keys/2", b"k2").await.unwrap();
        backend.put("vaults/names/n", b"1").await.unwrap();

        let entries = backend.scan("vaults/keys/").await.unwrap();
        assert_eq!(
            entries,
            vec![
                ("vaults/keys/1".to_owned(), b"k1".to_vec()),
                ("vaults/keys/2".to_owned(), b"k2".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.put("key", b"val").await.unwrap();
        assert_eq!(clone.get("key").await.unwrap(), Some(b"val".to_vec()));
    }
}
