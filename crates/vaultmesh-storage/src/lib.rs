//! Storage backend abstraction for `VaultMesh`.
//!
//! This crate defines the [`StorageBackend`] trait, an ordered key-value
//! interface that knows nothing about permissions, vaults, or encryption.
//! The barrier in `vaultmesh-core` wraps a backend so that every value is
//! encrypted before it reaches this layer, and the typed DB layer above it
//! carves the flat key space into nested domains.
//!
//! Two implementations are provided:
//!
//! - [`RocksDbBackend`]: production default, backed by `RocksDB` (feature `rocksdb-backend`)
//! - [`MemoryBackend`]: in-memory, for tests and ephemeral nodes

mod error;
mod memory;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_backend::RocksDbBackend;

/// One write inside an atomic [`StorageBackend::batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite `key` with `value`.
    Put { key: String, value: Vec<u8> },
    /// Remove `key` (absent keys are ignored).
    Delete { key: String },
}

impl BatchOp {
    /// The key this operation touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A pluggable, ordered key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g. `acl/nodes/<id>`,
/// `vaults/names/<name>`). Values are opaque byte arrays, always encrypted
/// by the barrier before reaching storage.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Deleting a non-existent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Apply a group of writes.
    ///
    /// Backends that support it apply the whole group atomically; the
    /// default implementation applies the operations one at a time, in
    /// order, and stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] / [`StorageError::Delete`] from the
    /// first failing operation, or [`StorageError::Transaction`] if an
    /// atomic commit fails.
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        for op in ops {
            match op {
                BatchOp::Put { key, value } => self.put(&key, &value).await?,
                BatchOp::Delete { key } => self.delete(&key).await?,
            }
        }
        Ok(())
    }

    /// Return every `(key, value)` pair under `prefix`, in key order.
    ///
    /// The default implementation lists keys and reads each one; keys that
    /// vanish between the two steps are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] or [`StorageError::Read`] if the
    /// underlying backend fails.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let keys = self.list(prefix).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(&key).await? {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    /// Check whether a key exists in storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
