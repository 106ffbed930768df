//! Encryption barrier for `VaultMesh`.
//!
//! Every value that reaches the storage backend passes through the barrier's
//! encrypt/decrypt; the backend only ever sees ciphertext. Keys stay in
//! plaintext so prefix listing keeps working.
//!
//! The node's root key lives only in process memory. While no key is loaded
//! the barrier is sealed and rejects every operation with
//! [`BarrierError::Sealed`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use vaultmesh_storage::{BatchOp, StorageBackend};

use crate::crypto::{self, EncryptionKey};
use crate::error::BarrierError;

/// The encryption barrier wrapping a storage backend.
pub struct Barrier {
    storage: Arc<dyn StorageBackend>,
    key: RwLock<Option<EncryptionKey>>,
}

impl Barrier {
    /// Create a new sealed barrier wrapping the given storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            key: RwLock::new(None),
        }
    }

    /// Create a barrier that is already unsealed with `key`.
    #[must_use]
    pub fn unsealed(storage: Arc<dyn StorageBackend>, key: EncryptionKey) -> Self {
        Self {
            storage,
            key: RwLock::new(Some(key)),
        }
    }

    /// Load the root key; subsequent reads and writes succeed.
    pub async fn unseal(&self, key: EncryptionKey) {
        *self.key.write().await = Some(key);
    }

    /// Drop the root key. The old key is zeroized when it is dropped.
    pub async fn seal(&self) {
        *self.key.write().await = None;
    }

    /// Whether a root key is currently loaded.
    pub async fn is_unsealed(&self) -> bool {
        self.key.read().await.is_some()
    }

    /// Read and decrypt a value. Returns `Ok(None)` for absent keys.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if no root key is loaded.
    /// - [`BarrierError::Crypto`] if decryption fails.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        let root_key = self.root_key().await?;
        match self.storage.get(key).await? {
            None => Ok(None),
            Some(ciphertext) => Ok(Some(crypto::decrypt(&root_key, &ciphertext)?)),
        }
    }

    /// Encrypt and write a value.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if no root key is loaded.
    /// - [`BarrierError::Crypto`] if encryption fails.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), BarrierError> {
        let root_key = self.root_key().await?;
        let ciphertext = crypto::encrypt(&root_key, value)?;
        self.storage.put(key, &ciphertext).await?;
        Ok(())
    }

    /// Delete a key.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if no root key is loaded.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn delete(&self, key: &str) -> Result<(), BarrierError> {
        self.root_key().await?;
        self.storage.delete(key).await?;
        Ok(())
    }

    /// Encrypt every `Put` in `ops` and hand the group to the backend as
    /// one batch.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if no root key is loaded.
    /// - [`BarrierError::Crypto`] if any encryption fails (nothing is written).
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), BarrierError> {
        if ops.is_empty() {
            return Ok(());
        }
        let root_key = self.root_key().await?;
        let sealed = ops
            .into_iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => Ok(BatchOp::Put {
                    key,
                    value: crypto::encrypt(&root_key, &value)?,
                }),
                BatchOp::Delete { key } => Ok(BatchOp::Delete { key }),
            })
            .collect::<Result<Vec<_>, BarrierError>>()?;
        self.storage.batch(sealed).await?;
        Ok(())
    }

    /// List keys under `prefix`.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if no root key is loaded.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, BarrierError> {
        self.root_key().await?;
        Ok(self.storage.list(prefix).await?)
    }

    /// Read and decrypt every `(key, value)` pair under `prefix`.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if no root key is loaded.
    /// - [`BarrierError::Crypto`] if any value fails to decrypt.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, BarrierError> {
        let root_key = self.root_key().await?;
        self.storage
            .scan(prefix)
            .await?
            .into_iter()
            .map(|(k, v)| Ok((k, crypto::decrypt(&root_key, &v)?)))
            .collect()
    }

    async fn root_key(&self) -> Result<EncryptionKey, BarrierError> {
        self.key.read().await.clone().ok_or(BarrierError::Sealed)
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier").finish_non_exhaustive()
    }
}
