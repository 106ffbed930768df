//! Error types for `vaultmesh-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material, only descriptions
//! of the failing operation.

use vaultmesh_storage::StorageError;

use crate::ids::{NodeId, VaultId};
use crate::lock::LockRank;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// Ciphertext is too short to contain a valid nonce + tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// Encoded key material had the wrong shape.
    #[error("invalid key encoding: {reason}")]
    InvalidKey { reason: String },
}

/// Errors from the encryption barrier.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// The barrier holds no root key, so nothing can be read or written.
    #[error("storage is sealed")]
    Sealed,

    /// A cryptographic operation within the barrier failed.
    #[error("barrier crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying storage backend returned an error.
    #[error("barrier storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the typed, domain-prefixed database layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A value could not be encoded before writing.
    #[error("failed to encode value for '{key}': {reason}")]
    Encode { key: String, reason: String },

    /// A stored value could not be decoded into the requested type.
    #[error("failed to decode value at '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// A domain segment or key contained a reserved character.
    #[error("invalid key segment '{segment}': {reason}")]
    InvalidSegment { segment: String, reason: String },

    /// The barrier returned an error.
    #[error("db barrier error: {0}")]
    Barrier(#[from] BarrierError),
}

/// Errors from parsing identifiers.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// The string is not a valid identifier of the given kind.
    #[error("invalid {kind} '{value}': {reason}")]
    Invalid {
        kind: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors from transaction lock bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// A lock was requested after a lock that must come later in the
    /// global order was already taken by the same transaction.
    #[error("lock order violation: cannot take {requested:?} while holding {held:?}")]
    OrderViolation { requested: LockRank, held: LockRank },
}

/// Errors from the access control list.
#[derive(Debug, thiserror::Error)]
pub enum AclError {
    /// The operation needs an existing permission for this node.
    #[error("node {node_id} has no permission")]
    NodeIdMissing { node_id: NodeId },

    /// A seeding operation found a node that already has a permission.
    #[error("node {node_id} already has a permission")]
    NodeIdExists { node_id: NodeId },

    /// The vault has no reverse-index entry to propagate from.
    #[error("vault {vault_id} has no permission index")]
    VaultIdMissing { vault_id: VaultId },

    /// The database layer returned an error.
    #[error("acl db error: {0}")]
    Db(#[from] DbError),

    /// Lock ordering was violated by the caller's transaction.
    #[error("acl lock error: {0}")]
    Lock(#[from] LockError),
}

/// Errors from the trust (gestalt) graph.
#[derive(Debug, thiserror::Error)]
pub enum GestaltError {
    /// The node is not part of any gestalt.
    #[error("node {node_id} is not in the trust graph")]
    NodeMissing { node_id: NodeId },

    /// An ACL update triggered by the graph failed.
    #[error("gestalt acl error: {0}")]
    Acl(#[from] AclError),

    /// The database layer returned an error.
    #[error("gestalt db error: {0}")]
    Db(#[from] DbError),

    /// Lock ordering was violated by the caller's transaction.
    #[error("gestalt lock error: {0}")]
    Lock(#[from] LockError),
}

/// Errors raised while talking to a remote node.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The remote node could not be reached.
    #[error("node {node_id} unreachable: {reason}")]
    Unreachable { node_id: NodeId, reason: String },

    /// The remote node refused the request for lack of permission.
    #[error("node {node_id} denied access to vault {vault_id}")]
    PermissionDenied { node_id: NodeId, vault_id: VaultId },

    /// The remote node does not know the vault.
    #[error("node {node_id} has no vault {vault_id}")]
    VaultNotFound { node_id: NodeId, vault_id: VaultId },

    /// The remote node answered with something we could not interpret.
    #[error("protocol error talking to node {node_id}: {reason}")]
    Protocol { node_id: NodeId, reason: String },
}

/// Errors from the vault registry and vault lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// No vault is registered under this id.
    #[error("vault {vault_id} is not defined")]
    VaultUndefined { vault_id: VaultId },

    /// A vault with this name (or id) is already registered.
    #[error("vault '{name}' is already defined")]
    VaultDefined { name: String },

    /// Could not find an unused vault id within the retry budget.
    #[error("failed to generate a unique vault id after {attempts} attempts")]
    CreateVaultId { attempts: usize },

    /// The node is not part of the trust graph.
    #[error("node {node_id} is not in any gestalt")]
    GestaltNodeIdMissing { node_id: NodeId },

    /// The remote node refused a clone or pull for lack of `pull` permission.
    #[error("node {node_id} does not allow pulling vault {vault_id}")]
    GitPermissionDenied { node_id: NodeId, vault_id: VaultId },

    /// No address is known for the remote node.
    #[error("no connection available for node {node_id}")]
    NodeConnectionNotExist { node_id: NodeId },

    /// `pull` was called without a remote and none is recorded.
    #[error("vault {vault_id} has no default remote to pull from")]
    NoDefaultRemote { vault_id: VaultId },

    /// The vault name is not acceptable.
    #[error("invalid vault name: {reason}")]
    InvalidName { reason: String },

    /// The vault handle is stopped.
    #[error("vault {vault_id} is not running")]
    VaultStopped { vault_id: VaultId },

    /// The secret does not exist in the vault.
    #[error("secret '{name}' not found in vault {vault_id}")]
    SecretNotFound { vault_id: VaultId, name: String },

    /// A filesystem operation on the vault directory failed.
    #[error("vault io error at '{path}': {reason}")]
    Io { path: String, reason: String },

    /// A cryptographic operation on vault content failed.
    #[error("vault crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The remote transport failed.
    #[error("vault transport error: {0}")]
    Transport(#[from] TransportError),

    /// The access control list returned an error.
    #[error("vault acl error: {0}")]
    Acl(#[from] AclError),

    /// The trust graph returned an error.
    #[error("vault gestalt error: {0}")]
    Gestalt(#[from] GestaltError),

    /// The database layer returned an error.
    #[error("vault db error: {0}")]
    Db(#[from] DbError),

    /// Lock ordering was violated by the caller's transaction.
    #[error("vault lock error: {0}")]
    Lock(#[from] LockError),
}

impl VaultError {
    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}
