//! Talking to other nodes.
//!
//! The vault manager only sees two traits: [`NodeConnections`] resolves a
//! [`NodeId`] to a [`NodeClient`], and the client asks the remote node to
//! check permissions, list vaults, or hand over a vault's content. The HTTP
//! implementation lives in the node crate; the in-process implementations
//! here wire two managers together directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{TransportError, VaultError};
use crate::ids::{NodeId, VaultId};
use crate::vault::VaultSnapshot;
use crate::vault_manager::VaultManager;

/// Requests a node can make of a remote node's vault manager.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Whether `requester` holds `pull` on the remote's `vault_id`.
    async fn check_vault_permissions(
        &self,
        requester: &NodeId,
        vault_id: &VaultId,
    ) -> Result<bool, TransportError>;

    /// Names of the remote vaults `requester` may pull.
    async fn scan_vaults(&self, requester: &NodeId) -> Result<Vec<String>, TransportError>;

    /// Full content of a remote vault.
    async fn fetch_vault(
        &self,
        requester: &NodeId,
        vault_id: &VaultId,
    ) -> Result<VaultSnapshot, TransportError>;
}

/// Address book from node ids to clients.
#[async_trait]
pub trait NodeConnections: Send + Sync {
    /// A client for `node_id`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NodeConnectionNotExist`] for unknown nodes.
    async fn connect(&self, node_id: &NodeId) -> Result<Arc<dyn NodeClient>, VaultError>;
}

/// In-memory address book.
#[derive(Default)]
pub struct StaticNodeConnections {
    clients: RwLock<HashMap<NodeId, Arc<dyn NodeClient>>>,
}

impl StaticNodeConnections {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, node_id: NodeId, client: Arc<dyn NodeClient>) {
        self.clients.write().await.insert(node_id, client);
    }

    pub async fn remove(&self, node_id: &NodeId) {
        self.clients.write().await.remove(node_id);
    }
}

#[async_trait]
impl NodeConnections for StaticNodeConnections {
    async fn connect(&self, node_id: &NodeId) -> Result<Arc<dyn NodeClient>, VaultError> {
        self.clients
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| VaultError::NodeConnectionNotExist {
                node_id: node_id.clone(),
            })
    }
}

impl std::fmt::Debug for StaticNodeConnections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticNodeConnections").finish_non_exhaustive()
    }
}

/// Client that calls another in-process vault manager directly.
#[derive(Debug, Clone)]
pub struct LocalNodeClient {
    manager: Arc<VaultManager>,
}

impl LocalNodeClient {
    #[must_use]
    pub fn new(manager: Arc<VaultManager>) -> Self {
        Self { manager }
    }
}

/// Map an owner-side failure to what the requester sees on the wire.
pub fn owner_error(owner: &NodeId, vault_id: &VaultId, err: VaultError) -> TransportError {
    match err {
        VaultError::GitPermissionDenied { .. } => TransportError::PermissionDenied {
            node_id: owner.clone(),
            vault_id: vault_id.clone(),
        },
        VaultError::VaultUndefined { .. } => TransportError::VaultNotFound {
            node_id: owner.clone(),
            vault_id: vault_id.clone(),
        },
        other => TransportError::Protocol {
            node_id: owner.clone(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl NodeClient for LocalNodeClient {
    async fn check_vault_permissions(
        &self,
        requester: &NodeId,
        vault_id: &VaultId,
    ) -> Result<bool, TransportError> {
        self.manager
            .check_vault_permission(requester, vault_id)
            .await
            .map_err(|e| owner_error(self.manager.node_id(), vault_id, e))
    }

    async fn scan_vaults(&self, requester: &NodeId) -> Result<Vec<String>, TransportError> {
        self.manager
            .scan_vaults_for(requester)
            .await
            .map_err(|e| TransportError::Protocol {
                node_id: self.manager.node_id().clone(),
                reason: e.to_string(),
            })
    }

    async fn fetch_vault(
        &self,
        requester: &NodeId,
        vault_id: &VaultId,
    ) -> Result<VaultSnapshot, TransportError> {
        self.manager
            .fetch_vault_for(requester, vault_id)
            .await
            .map_err(|e| owner_error(self.manager.node_id(), vault_id, e))
    }
}
