//! Shared application state for the `VaultMesh` node.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds references to the barrier, the ACL,
//! the trust graph, the vault manager and the peer address book.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use vaultmesh_core::{Acl, Barrier, Db, GestaltGraph, NodeId, VaultManager, VaultManagerConfig};
use vaultmesh_storage::{MemoryBackend, StorageBackend};

use crate::client::HttpNodeConnections;
use crate::config::{NodeConfig, StorageBackendType};
use crate::keys::NodeIdentity;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// This node's identity.
    pub node_id: NodeId,
    /// The encryption barrier under every durable record.
    pub barrier: Arc<Barrier>,
    /// Reference-counted permissions.
    pub acl: Arc<Acl>,
    /// The trust graph.
    pub gestalt_graph: Arc<GestaltGraph>,
    /// The vault registry.
    pub vault_manager: Arc<VaultManager>,
    /// Addresses of remote nodes.
    pub connections: Arc<HttpNodeConnections>,
}

impl AppState {
    /// Open storage and wire every subsystem together.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be opened, the peer
    /// HTTP client cannot be built, or the vault manager fails to start.
    pub async fn build(config: &NodeConfig, identity: NodeIdentity) -> anyhow::Result<Arc<Self>> {
        let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
            StorageBackendType::Memory => {
                info!("using in-memory storage (data will not persist)");
                Arc::new(MemoryBackend::new())
            }
            #[cfg(feature = "rocksdb-backend")]
            StorageBackendType::RocksDb { path } => {
                info!(path = %path.display(), "using RocksDB storage");
                Arc::new(
                    vaultmesh_storage::RocksDbBackend::open(path)
                        .context("failed to open RocksDB storage")?,
                )
            }
            #[cfg(not(feature = "rocksdb-backend"))]
            StorageBackendType::RocksDb { .. } => {
                anyhow::bail!("RocksDB backend requested but feature 'rocksdb-backend' is not enabled");
            }
        };

        let barrier = Arc::new(Barrier::unsealed(storage, identity.root_key));
        let db = Db::new(Arc::clone(&barrier));
        let acl = Arc::new(Acl::new(db.clone()));
        let gestalt_graph = Arc::new(GestaltGraph::new(db.clone(), Arc::clone(&acl)));
        let connections = Arc::new(
            HttpNodeConnections::new(config.peers.clone(), config.remote_timeout)
                .context("failed to build peer HTTP client")?,
        );

        let vault_manager = Arc::new(VaultManager::new(VaultManagerConfig {
            node_id: identity.node_id.clone(),
            vaults_dir: config.vaults_dir(),
            db,
            acl: Arc::clone(&acl),
            gestalt_graph: gestalt_graph.clone(),
            connections: connections.clone(),
        }));
        vault_manager
            .start()
            .await
            .context("failed to start vault manager")?;

        info!(
            node_id = %identity.node_id,
            peers = config.peers.len(),
            "node state ready"
        );

        Ok(Arc::new(Self {
            node_id: identity.node_id,
            barrier,
            acl,
            gestalt_graph,
            vault_manager,
            connections,
        }))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}
