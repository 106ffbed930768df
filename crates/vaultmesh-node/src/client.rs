//! HTTP implementation of the remote-node interfaces.
//!
//! [`HttpNodeConnections`] resolves node ids through the configured peer
//! address book; each [`HttpNodeClient`] calls the `/v1/peer` routes of one
//! remote node, naming this node in the `X-Node-Id` header.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use vaultmesh_core::{NodeClient, NodeConnections, NodeId, TransportError, VaultError, VaultId, VaultSnapshot};

use crate::middleware::NODE_ID_HEADER;
use crate::routes::peer::{PermissionCheckResponse, ScanResponse};

/// Client for one remote node.
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    node_id: NodeId,
    base_url: String,
    http: reqwest::Client,
}

impl HttpNodeClient {
    #[must_use]
    pub fn new(node_id: NodeId, base_url: String, http: reqwest::Client) -> Self {
        Self {
            node_id,
            base_url,
            http,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        requester: &NodeId,
        path: &str,
        vault_id: Option<&VaultId>,
    ) -> Result<T, TransportError> {
        let url = format!("{}/v1/peer{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header(NODE_ID_HEADER, requester.as_str())
            .send()
            .await
            .map_err(|e| TransportError::Unreachable {
                node_id: self.node_id.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return resp.json().await.map_err(|e| self.protocol(e.to_string()));
        }

        match (status, vault_id) {
            (StatusCode::FORBIDDEN, Some(vault_id)) => Err(TransportError::PermissionDenied {
                node_id: self.node_id.clone(),
                vault_id: vault_id.clone(),
            }),
            (StatusCode::NOT_FOUND, Some(vault_id)) => Err(TransportError::VaultNotFound {
                node_id: self.node_id.clone(),
                vault_id: vault_id.clone(),
            }),
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(self.protocol(format!("HTTP {}: {body}", status.as_u16())))
            }
        }
    }

    fn protocol(&self, reason: String) -> TransportError {
        TransportError::Protocol {
            node_id: self.node_id.clone(),
            reason,
        }
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn check_vault_permissions(
        &self,
        requester: &NodeId,
        vault_id: &VaultId,
    ) -> Result<bool, TransportError> {
        let resp: PermissionCheckResponse = self
            .get(
                requester,
                &format!("/vaults/{vault_id}/permission"),
                Some(vault_id),
            )
            .await?;
        Ok(resp.allowed)
    }

    async fn scan_vaults(&self, requester: &NodeId) -> Result<Vec<String>, TransportError> {
        let resp: ScanResponse = self.get(requester, "/vaults", None).await?;
        Ok(resp.names)
    }

    async fn fetch_vault(
        &self,
        requester: &NodeId,
        vault_id: &VaultId,
    ) -> Result<VaultSnapshot, TransportError> {
        self.get(requester, &format!("/vaults/{vault_id}"), Some(vault_id))
            .await
    }
}

/// Peer address book backed by HTTP clients.
#[derive(Debug)]
pub struct HttpNodeConnections {
    peers: RwLock<BTreeMap<NodeId, String>>,
    http: reqwest::Client,
}

impl HttpNodeConnections {
    /// Build the address book. Every request to a peer times out after
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn new(peers: BTreeMap<NodeId, String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vaultmesh-node/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            peers: RwLock::new(peers),
            http,
        })
    }

    /// Add or replace the address of a peer.
    pub async fn insert(&self, node_id: NodeId, base_url: String) {
        let base_url = base_url.trim_end_matches('/').to_owned();
        self.peers.write().await.insert(node_id, base_url);
    }

    /// Forget a peer. Returns whether it was known.
    pub async fn remove(&self, node_id: &NodeId) -> bool {
        self.peers.write().await.remove(node_id).is_some()
    }

    /// Snapshot of the address book.
    pub async fn peers(&self) -> BTreeMap<NodeId, String> {
        self.peers.read().await.clone()
    }
}

#[async_trait]
impl NodeConnections for HttpNodeConnections {
    async fn connect(&self, node_id: &NodeId) -> Result<Arc<dyn NodeClient>, VaultError> {
        let base_url = self.peers.read().await.get(node_id).cloned().ok_or_else(|| {
            VaultError::NodeConnectionNotExist {
                node_id: node_id.clone(),
            }
        })?;
        Ok(Arc::new(HttpNodeClient::new(
            node_id.clone(),
            base_url,
            self.http.clone(),
        )))
    }
}
