//! Core library for `VaultMesh`.
//!
//! Contains the encryption barrier, cryptographic primitives, the typed
//! domain-prefixed DB layer, transaction locks, the reference-counted ACL,
//! the trust (gestalt) graph, vault handles and the vault registry. This
//! crate depends on `vaultmesh-storage` for the storage backend trait and
//! knows nothing about HTTP or the node binary.

pub mod acl;
pub mod barrier;
pub mod crypto;
pub mod db;
pub mod error;
pub mod gestalt;
pub mod ids;
pub mod lock;
pub mod remote;
pub mod vault;
pub mod vault_manager;

pub use acl::{Acl, GestaltAction, Permission, PermissionRef, VaultAction, VaultPermissions};
pub use barrier::Barrier;
pub use crypto::EncryptionKey;
pub use db::{Db, Domain};
pub use error::{
    AclError, BarrierError, CryptoError, DbError, GestaltError, IdError, LockError,
    TransportError, VaultError,
};
pub use gestalt::{Gestalt, GestaltGraph, TrustGraph};
pub use ids::{NodeId, PermissionId, VaultId};
pub use lock::{LockRank, Transaction, TransactionLock};
pub use remote::{LocalNodeClient, NodeClient, NodeConnections, StaticNodeConnections};
pub use vault::{Vault, VaultSnapshot, VaultStats};
pub use vault_manager::{VaultEntry, VaultManager, VaultManagerConfig};
