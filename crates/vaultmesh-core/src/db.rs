//! Typed, domain-prefixed access to the encrypted store.
//!
//! A [`Domain`] is a `/`-separated key prefix; [`Domain::level`] nests one
//! domain inside another the way `acl/nodes/` sits inside `acl/`. Values
//! are JSON-encoded and pass through the [`Barrier`], so everything below
//! this layer is ciphertext.
//!
//! Multi-key updates are collected in a [`Batch`] and committed with
//! [`Db::batch`], which the storage backend applies atomically.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use vaultmesh_storage::BatchOp;

use crate::barrier::Barrier;
use crate::error::DbError;

/// A key namespace inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Domain {
    prefix: String,
}

impl Domain {
    /// A top-level domain.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            prefix: format!("{name}/"),
        }
    }

    /// A sub-domain nested under `self`.
    #[must_use]
    pub fn level(&self, name: &str) -> Self {
        Self {
            prefix: format!("{}{name}/", self.prefix),
        }
    }

    /// The full key prefix, always ending in `/`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the full storage key for `key` inside this domain.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidSegment`] if `key` is empty or contains `/`.
    pub fn key(&self, key: &str) -> Result<String, DbError> {
        if key.is_empty() || key.contains('/') {
            return Err(DbError::InvalidSegment {
                segment: key.to_owned(),
                reason: "keys must be non-empty and must not contain '/'".to_owned(),
            });
        }
        Ok(format!("{}{key}", self.prefix))
    }
}

/// A group of writes committed together by [`Db::batch`].
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write of `value` at `domain/key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Encode`] if `value` cannot be serialized, or
    /// [`DbError::InvalidSegment`] for a malformed key.
    pub fn put<T: Serialize>(
        &mut self,
        domain: &Domain,
        key: &str,
        value: &T,
    ) -> Result<&mut Self, DbError> {
        let key = domain.key(key)?;
        let value = serde_json::to_vec(value).map_err(|e| DbError::Encode {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.ops.push(BatchOp::Put { key, value });
        Ok(self)
    }

    /// Queue a delete of `domain/key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidSegment`] for a malformed key.
    pub fn del(&mut self, domain: &Domain, key: &str) -> Result<&mut Self, DbError> {
        let key = domain.key(key)?;
        self.ops.push(BatchOp::Delete { key });
        Ok(self)
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing has been queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Typed view over the barrier.
#[derive(Debug, Clone)]
pub struct Db {
    barrier: Arc<Barrier>,
}

impl Db {
    /// Wrap a barrier.
    #[must_use]
    pub fn new(barrier: Arc<Barrier>) -> Self {
        Self { barrier }
    }

    /// The barrier underneath this view.
    #[must_use]
    pub fn barrier(&self) -> &Arc<Barrier> {
        &self.barrier
    }

    /// Read and decode `domain/key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Decode`] if the stored bytes are not a `T`, or
    /// [`DbError::Barrier`] if the read fails.
    pub async fn get<T: DeserializeOwned>(
        &self,
        domain: &Domain,
        key: &str,
    ) -> Result<Option<T>, DbError> {
        let full = domain.key(key)?;
        match self.barrier.get(&full).await? {
            None => Ok(None),
            Some(bytes) => decode(&full, &bytes).map(Some),
        }
    }

    /// Encode and write `value` at `domain/key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Encode`] or [`DbError::Barrier`].
    pub async fn put<T: Serialize>(
        &self,
        domain: &Domain,
        key: &str,
        value: &T,
    ) -> Result<(), DbError> {
        let mut batch = Batch::new();
        batch.put(domain, key, value)?;
        self.batch(batch).await
    }

    /// Delete `domain/key`. Absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Barrier`] if the delete fails.
    pub async fn del(&self, domain: &Domain, key: &str) -> Result<(), DbError> {
        let full = domain.key(key)?;
        self.barrier.delete(&full).await?;
        Ok(())
    }

    /// Commit every queued operation at once.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Barrier`] if the commit fails; in that case none
    /// of the writes are visible.
    pub async fn batch(&self, batch: Batch) -> Result<(), DbError> {
        self.barrier.batch(batch.ops).await?;
        Ok(())
    }

    /// Keys directly inside `domain` (nested domains are skipped).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Barrier`] if listing fails.
    pub async fn keys(&self, domain: &Domain) -> Result<Vec<String>, DbError> {
        let keys = self.barrier.list(domain.prefix()).await?;
        Ok(keys
            .iter()
            .filter_map(|k| k.strip_prefix(domain.prefix()))
            .filter(|k| !k.contains('/'))
            .map(str::to_owned)
            .collect())
    }

    /// Decoded `(key, value)` pairs directly inside `domain`, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Decode`] for a value of the wrong shape, or
    /// [`DbError::Barrier`] if the scan fails.
    pub async fn entries<T: DeserializeOwned>(
        &self,
        domain: &Domain,
    ) -> Result<Vec<(String, T)>, DbError> {
        let mut out = Vec::new();
        for (full, bytes) in self.barrier.scan(domain.prefix()).await? {
            let Some(key) = full.strip_prefix(domain.prefix()) else {
                continue;
            };
            if key.contains('/') {
                continue;
            }
            out.push((key.to_owned(), decode(&full, &bytes)?));
        }
        Ok(out)
    }

    /// Delete every key under `domain`, nested domains included.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Barrier`] if listing or deleting fails.
    pub async fn clear(&self, domain: &Domain) -> Result<(), DbError> {
        let ops = self
            .barrier
            .list(domain.prefix())
            .await?
            .into_iter()
            .map(|key| BatchOp::Delete { key })
            .collect();
        self.barrier.batch(ops).await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, DbError> {
    serde_json::from_slice(bytes).map_err(|e| DbError::Decode {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use vaultmesh_storage::MemoryBackend;

    pub(crate) fn memory_db() -> Db {
        let barrier = Barrier::unsealed(Arc::new(MemoryBackend::new()), EncryptionKey::generate());
        Db::new(Arc::new(barrier))
    }

    #[test]
    fn level_nests_prefixes() {
        let acl = Domain::new("acl");
        assert_eq!(acl.level("nodes").prefix(), "acl/nodes/");
        assert_eq!(acl.level("nodes").key("n1").unwrap(), "acl/nodes/n1");
    }

    #[test]
    fn key_rejects_separator() {
        let domain = Domain::new("vaults");
        assert!(matches!(
            domain.key("a/b"),
            Err(DbError::InvalidSegment { .. })
        ));
        assert!(domain.key("").is_err());
    }

    #[tokio::test]
    async fn typed_put_get_roundtrip() {
        let db = memory_db();
        let domain = Domain::new("t");
        db.put(&domain, "k", &vec!["a".to_owned(), "b".to_owned()])
            .await
            .unwrap();
        let got: Option<Vec<String>> = db.get(&domain, "k").await.unwrap();
        assert_eq!(got, Some(vec!["a".to_owned(), "b".to_owned()]));
    }

    #[tokio::test]
    async fn decode_error_names_the_key() {
        let db = memory_db();
        let domain = Domain::new("t");
        db.put(&domain, "k", &"text").await.unwrap();
        let err = db.get::<u64>(&domain, "k").await.unwrap_err();
        assert!(matches!(err, DbError::Decode { ref key, .. } if key == "t/k"));
    }

    #[tokio::test]
    async fn keys_and_entries_skip_nested_domains() {
        let db = memory_db();
        let acl = Domain::new("acl");
        db.put(&acl, "top", &1u32).await.unwrap();
        db.put(&acl.level("nodes"), "n1", &2u32).await.unwrap();

        assert_eq!(db.keys(&acl).await.unwrap(), vec!["top"]);
        let entries: Vec<(String, u32)> = db.entries(&acl).await.unwrap();
        assert_eq!(entries, vec![("top".to_owned(), 1)]);
    }

    #[tokio::test]
    async fn batch_commits_all_writes() {
        let db = memory_db();
        let a = Domain::new("a");
        let b = Domain::new("b");
        db.put(&b, "old", &0u8).await.unwrap();

        let mut batch = Batch::new();
        batch.put(&a, "x", &1u8).unwrap();
        batch.del(&b, "old").unwrap();
        assert_eq!(batch.len(), 2);
        db.batch(batch).await.unwrap();

        assert_eq!(db.get::<u8>(&a, "x").await.unwrap(), Some(1));
        assert_eq!(db.get::<u8>(&b, "old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_removes_nested_keys() {
        let db = memory_db();
        let acl = Domain::new("acl");
        db.put(&acl.level("nodes"), "n", &1u8).await.unwrap();
        db.put(&acl.level("perms"), "p", &1u8).await.unwrap();
        db.put(&Domain::new("other"), "o", &1u8).await.unwrap();

        db.clear(&acl).await.unwrap();
        assert!(db.keys(&acl.level("nodes")).await.unwrap().is_empty());
        assert_eq!(db.keys(&Domain::new("other")).await.unwrap(), vec!["o"]);
    }
}
