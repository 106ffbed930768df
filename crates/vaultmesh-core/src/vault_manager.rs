//! Vault registry and lifecycle.
//!
//! The manager owns the durable mapping between vault names, ids and keys,
//! plus a cache of started [`Vault`] handles built lazily from it:
//!
//! - `vaults/names/<name>` → [`VaultId`]
//! - `vaults/ids/<vault_id>` → name
//! - `vaults/keys/<vault_id>` → hex vault key (encrypted by the barrier)
//! - `vaults/remotes/<vault_id>` → [`NodeId`] the vault was cloned or last
//!   pulled from
//!
//! Every remote operation is gated: the owner node is asked whether this
//! node holds `pull` before any content moves. Operations that also touch
//! the trust graph or the ACL take those locks first, in the global order
//! Gestalt → Acl → Vaults.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::acl::{Acl, Permission, VaultAction};
use crate::crypto::EncryptionKey;
use crate::db::{Batch, Db, Domain};
use crate::error::{TransportError, VaultError};
use crate::gestalt::TrustGraph;
use crate::ids::{NodeId, VaultId, generate_unique};
use crate::lock::{LockRank, Transaction, TransactionLock};
use crate::remote::{NodeClient, NodeConnections};
use crate::vault::{Vault, VaultSnapshot, VaultStats, validate_name};

/// Collisions tolerated while generating a fresh vault id.
const CREATE_VAULT_ID_ATTEMPTS: usize = 50;

/// Everything a [`VaultManager`] is built from.
pub struct VaultManagerConfig {
    /// This node's identity, sent to remote nodes as the requester.
    pub node_id: NodeId,
    /// Parent directory of every vault directory.
    pub vaults_dir: PathBuf,
    /// Registry records live under the `vaults` domain of this DB.
    pub db: Db,
    /// Permissions consulted and updated by the registry.
    pub acl: Arc<Acl>,
    /// Expands a node into its gestalt when granting vault access.
    pub gestalt_graph: Arc<dyn TrustGraph>,
    /// Resolves remote node ids for clone, pull and scan.
    pub connections: Arc<dyn NodeConnections>,
}

/// One row of [`VaultManager::list_vaults`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    /// Unique vault name on this node.
    pub name: String,
    /// Stable vault id, shared with clones on other nodes.
    pub id: VaultId,
}

/// The vault registry.
pub struct VaultManager {
    node_id: NodeId,
    vaults_dir: PathBuf,
    db: Db,
    acl: Arc<Acl>,
    gestalt_graph: Arc<dyn TrustGraph>,
    connections: Arc<dyn NodeConnections>,
    lock: TransactionLock,
    root: Domain,
    names: Domain,
    ids: Domain,
    keys: Domain,
    remotes: Domain,
    handles: RwLock<HashMap<VaultId, Arc<Vault>>>,
}

impl VaultManager {
    #[must_use]
    pub fn new(config: VaultManagerConfig) -> Self {
        let root = Domain::new("vaults");
        Self {
            node_id: config.node_id,
            vaults_dir: config.vaults_dir,
            db: config.db,
            acl: config.acl,
            gestalt_graph: config.gestalt_graph,
            connections: config.connections,
            lock: TransactionLock::new(LockRank::Vaults),
            names: root.level("names"),
            ids: root.level("ids"),
            keys: root.level("keys"),
            remotes: root.level("remotes"),
            root,
            handles: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    #[must_use]
    pub fn lock(&self) -> &TransactionLock {
        &self.lock
    }

    #[must_use]
    pub fn acl(&self) -> &Arc<Acl> {
        &self.acl
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Make sure the vaults directory exists. Handles are loaded lazily on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the directory cannot be created.
    pub async fn start(&self) -> Result<(), VaultError> {
        fs::create_dir_all(&self.vaults_dir)
            .await
            .map_err(|e| VaultError::io(&self.vaults_dir, &e))?;
        let count = self.db.keys(&self.ids).await?.len();
        info!(node_id = %self.node_id, vaults = count, dir = %self.vaults_dir.display(), "vault manager started");
        Ok(())
    }

    /// Stop and forget every cached handle.
    pub async fn stop(&self) {
        let handles: Vec<Arc<Vault>> = self.handles.write().await.drain().map(|(_, v)| v).collect();
        for vault in &handles {
            vault.stop().await;
        }
        info!(node_id = %self.node_id, stopped = handles.len(), "vault manager stopped");
    }

    /// Stop, delete every vault directory, and clear the registry.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] or [`VaultError::Db`].
    pub async fn destroy(&self) -> Result<(), VaultError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        self.stop().await;
        match fs::remove_dir_all(&self.vaults_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(VaultError::io(&self.vaults_dir, &e)),
        }
        self.db.clear(&self.root).await?;
        info!(node_id = %self.node_id, "vault manager destroyed");
        Ok(())
    }

    // ── Registry ─────────────────────────────────────────────────────

    fn vault_dir(&self, vault_id: &VaultId) -> PathBuf {
        self.vaults_dir.join(vault_id.as_str())
    }

    async fn record_name(&self, vault_id: &VaultId) -> Result<Option<String>, VaultError> {
        Ok(self.db.get(&self.ids, vault_id.as_str()).await?)
    }

    async fn require_vault(&self, vault_id: &VaultId) -> Result<String, VaultError> {
        self.record_name(vault_id)
            .await?
            .ok_or_else(|| VaultError::VaultUndefined {
                vault_id: vault_id.clone(),
            })
    }

    async fn name_taken(&self, name: &str) -> Result<bool, VaultError> {
        Ok(self
            .db
            .get::<VaultId>(&self.names, name)
            .await?
            .is_some())
    }

    /// Lay out the directory, optionally fill it, then write the records.
    /// The directory is removed again if any step fails.
    async fn register(
        &self,
        vault_id: VaultId,
        name: String,
        remote: Option<&NodeId>,
        content: Option<&VaultSnapshot>,
    ) -> Result<Arc<Vault>, VaultError> {
        let key = EncryptionKey::generate();
        let vault = Arc::new(
            Vault::create(
                self.vault_dir(&vault_id),
                vault_id.clone(),
                name.clone(),
                key.clone(),
            )
            .await?,
        );
        let written = async {
            if let Some(snapshot) = content {
                vault.restore(snapshot).await?;
            }
            let mut batch = Batch::new();
            batch.put(&self.names, &name, &vault_id)?;
            batch.put(&self.ids, vault_id.as_str(), &name)?;
            batch.put(&self.keys, vault_id.as_str(), &*key.to_hex())?;
            if let Some(remote) = remote {
                batch.put(&self.remotes, vault_id.as_str(), remote)?;
            }
            self.db.batch(batch).await?;
            Ok::<(), VaultError>(())
        }
        .await;
        if let Err(e) = written {
            vault.remove().await;
            return Err(e);
        }
        self.handles
            .write()
            .await
            .insert(vault_id, Arc::clone(&vault));
        Ok(vault)
    }

    /// Create an empty vault with a fresh id and key.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidName`] for a bad name.
    /// - [`VaultError::VaultDefined`] if the name is taken.
    /// - [`VaultError::CreateVaultId`] if no free id was found.
    /// - [`VaultError::Io`] or [`VaultError::Db`].
    pub async fn create_vault(&self, name: &str) -> Result<Arc<Vault>, VaultError> {
        let mut tx = Transaction::new();
        self.create_vault_tx(&mut tx, name).await
    }

    /// [`create_vault`](Self::create_vault) inside `tx`.
    ///
    /// # Errors
    ///
    /// As [`create_vault`](Self::create_vault), plus [`VaultError::Lock`].
    pub async fn create_vault_tx(
        &self,
        tx: &mut Transaction,
        name: &str,
    ) -> Result<Arc<Vault>, VaultError> {
        validate_name(name)?;
        tx.acquire(&self.lock).await?;
        if self.name_taken(name).await? {
            return Err(VaultError::VaultDefined {
                name: name.to_owned(),
            });
        }
        let db = self.db.clone();
        let ids = self.ids.clone();
        let vault_id = generate_unique(CREATE_VAULT_ID_ATTEMPTS, VaultId::generate, |id: &VaultId| {
            let db = db.clone();
            let ids = ids.clone();
            let key = id.to_string();
            async move { db.get::<String>(&ids, &key).await.map(|v| v.is_some()) }
        })
        .await?
        .map_err(|e| VaultError::CreateVaultId {
            attempts: e.attempts,
        })?;

        let vault = self.register(vault_id, name.to_owned(), None, None).await?;
        info!(vault_id = %vault.id(), name = %name, "vault created");
        Ok(vault)
    }

    /// The started handle for `vault_id`, loading it from the registry if
    /// it is not cached.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultUndefined`] if the id is unknown.
    /// - [`VaultError::Io`], [`VaultError::Crypto`] or [`VaultError::Db`]
    ///   if the stored record cannot be loaded.
    pub async fn get_vault(&self, vault_id: &VaultId) -> Result<Arc<Vault>, VaultError> {
        let mut tx = Transaction::new();
        self.get_vault_tx(&mut tx, vault_id).await
    }

    /// [`get_vault`](Self::get_vault) inside `tx`.
    ///
    /// # Errors
    ///
    /// As [`get_vault`](Self::get_vault), plus [`VaultError::Lock`].
    pub async fn get_vault_tx(
        &self,
        tx: &mut Transaction,
        vault_id: &VaultId,
    ) -> Result<Arc<Vault>, VaultError> {
        tx.acquire(&self.lock).await?;
        if let Some(vault) = self.handles.read().await.get(vault_id) {
            return Ok(Arc::clone(vault));
        }
        let name = self.require_vault(vault_id).await?;
        let hex: Zeroizing<String> = Zeroizing::new(
            self.db
                .get::<String>(&self.keys, vault_id.as_str())
                .await?
                .ok_or_else(|| VaultError::VaultUndefined {
                    vault_id: vault_id.clone(),
                })?,
        );
        let key = EncryptionKey::from_hex(&hex)?;
        let vault = Arc::new(Vault::open(
            self.vault_dir(vault_id),
            vault_id.clone(),
            name,
        ));
        vault.start(key).await?;
        self.handles
            .write()
            .await
            .insert(vault_id.clone(), Arc::clone(&vault));
        Ok(vault)
    }

    /// Reverse lookup by name.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Db`] if the store fails.
    pub async fn get_vault_id(&self, name: &str) -> Result<Option<VaultId>, VaultError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        if validate_name(name).is_err() {
            return Ok(None);
        }
        Ok(self.db.get(&self.names, name).await?)
    }

    /// The registered name of `vault_id`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Db`] if the store fails.
    pub async fn get_vault_name(&self, vault_id: &VaultId) -> Result<Option<String>, VaultError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        self.record_name(vault_id).await
    }

    /// The node `vault_id` was cloned or last pulled from.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultUndefined`] if the id is unknown.
    /// - [`VaultError::Db`] if the store fails.
    pub async fn get_default_remote(
        &self,
        vault_id: &VaultId,
    ) -> Result<Option<NodeId>, VaultError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        self.require_vault(vault_id).await?;
        Ok(self.db.get(&self.remotes, vault_id.as_str()).await?)
    }

    /// Stats of a vault's content.
    ///
    /// # Errors
    ///
    /// As [`get_vault`](Self::get_vault), plus [`VaultError::Io`].
    pub async fn get_vault_stats(&self, vault_id: &VaultId) -> Result<VaultStats, VaultError> {
        self.get_vault(vault_id).await?.stats().await
    }

    /// Every registered vault, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Db`] if the store fails.
    pub async fn list_vaults(&self) -> Result<Vec<VaultEntry>, VaultError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        Ok(self
            .db
            .entries::<VaultId>(&self.names)
            .await?
            .into_iter()
            .map(|(name, id)| VaultEntry { name, id })
            .collect())
    }

    /// Change a vault's name in the registry and in its cached handle.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultUndefined`] if the id is unknown.
    /// - [`VaultError::VaultDefined`] if `new_name` belongs to another vault.
    /// - [`VaultError::InvalidName`] or [`VaultError::Db`].
    pub async fn rename_vault(&self, vault_id: &VaultId, new_name: &str) -> Result<(), VaultError> {
        let mut tx = Transaction::new();
        self.rename_vault_tx(&mut tx, vault_id, new_name).await
    }

    /// [`rename_vault`](Self::rename_vault) inside `tx`.
    ///
    /// # Errors
    ///
    /// As [`rename_vault`](Self::rename_vault), plus [`VaultError::Lock`].
    pub async fn rename_vault_tx(
        &self,
        tx: &mut Transaction,
        vault_id: &VaultId,
        new_name: &str,
    ) -> Result<(), VaultError> {
        validate_name(new_name)?;
        tx.acquire(&self.lock).await?;
        let old_name = self.require_vault(vault_id).await?;
        if old_name == new_name {
            return Ok(());
        }
        if self.name_taken(new_name).await? {
            return Err(VaultError::VaultDefined {
                name: new_name.to_owned(),
            });
        }
        let mut batch = Batch::new();
        batch.del(&self.names, &old_name)?;
        batch.put(&self.names, new_name, vault_id)?;
        batch.put(&self.ids, vault_id.as_str(), &new_name)?;
        self.db.batch(batch).await?;
        if let Some(vault) = self.handles.read().await.get(vault_id) {
            vault.rename(new_name.to_owned()).await;
        }
        info!(vault_id = %vault_id, from = %old_name, to = %new_name, "vault renamed");
        Ok(())
    }

    /// Stop the vault, delete its directory and records, and strip it from
    /// every permission.
    ///
    /// Returns `Ok(false)` without touching the registry or the ACL when the
    /// directory could not be fully removed; the call can be retried.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultUndefined`] if the id is unknown.
    /// - [`VaultError::Acl`] or [`VaultError::Db`].
    pub async fn delete_vault(&self, vault_id: &VaultId) -> Result<bool, VaultError> {
        let mut tx = Transaction::new();
        self.delete_vault_tx(&mut tx, vault_id).await
    }

    /// [`delete_vault`](Self::delete_vault) inside `tx`. Takes the ACL lock
    /// before the registry lock.
    ///
    /// # Errors
    ///
    /// As [`delete_vault`](Self::delete_vault), plus [`VaultError::Lock`].
    pub async fn delete_vault_tx(
        &self,
        tx: &mut Transaction,
        vault_id: &VaultId,
    ) -> Result<bool, VaultError> {
        tx.acquire(self.acl.lock()).await?;
        tx.acquire(&self.lock).await?;
        let name = self.require_vault(vault_id).await?;
        let cached = self.handles.read().await.get(vault_id).cloned();
        let vault = cached.unwrap_or_else(|| {
            Arc::new(Vault::open(
                self.vault_dir(vault_id),
                vault_id.clone(),
                name.clone(),
            ))
        });
        if !vault.remove().await {
            // The stopped handle must not be served again; the next
            // `get_vault` reopens whatever is left on disk.
            self.handles.write().await.remove(vault_id);
            return Ok(false);
        }
        self.handles.write().await.remove(vault_id);

        let mut batch = Batch::new();
        batch.del(&self.names, &name)?;
        batch.del(&self.ids, vault_id.as_str())?;
        batch.del(&self.keys, vault_id.as_str())?;
        batch.del(&self.remotes, vault_id.as_str())?;
        self.db.batch(batch).await?;
        self.acl.unset_vault_perms_tx(tx, vault_id).await?;
        info!(vault_id = %vault_id, name = %name, "vault deleted");
        Ok(true)
    }

    // ── Permissions ──────────────────────────────────────────────────

    /// Grant `pull` on `vault_id` to every node in `node_id`'s gestalt.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultUndefined`] if the vault is unknown.
    /// - [`VaultError::GestaltNodeIdMissing`] if the node is not in the
    ///   trust graph.
    /// - [`VaultError::Acl`] or [`VaultError::Gestalt`].
    pub async fn set_vault_permissions(
        &self,
        node_id: &NodeId,
        vault_id: &VaultId,
    ) -> Result<(), VaultError> {
        let mut tx = Transaction::new();
        self.set_vault_permissions_tx(&mut tx, node_id, vault_id)
            .await
    }

    /// [`set_vault_permissions`](Self::set_vault_permissions) inside `tx`.
    ///
    /// # Errors
    ///
    /// As [`set_vault_permissions`](Self::set_vault_permissions), plus
    /// [`VaultError::Lock`].
    pub async fn set_vault_permissions_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
        vault_id: &VaultId,
    ) -> Result<(), VaultError> {
        tx.acquire(self.gestalt_graph.lock()).await?;
        tx.acquire(self.acl.lock()).await?;
        tx.acquire(&self.lock).await?;
        self.require_vault(vault_id).await?;
        let gestalt = self
            .gestalt_graph
            .get_gestalt_by_node_tx(tx, node_id)
            .await?
            .ok_or_else(|| VaultError::GestaltNodeIdMissing {
                node_id: node_id.clone(),
            })?;
        for member in &gestalt.nodes {
            if self.acl.get_node_permission_tx(tx, member).await?.is_none() {
                self.acl
                    .set_node_perm_tx(tx, member, Permission::new())
                    .await?;
            }
            self.acl
                .set_vault_action_tx(tx, vault_id, member, VaultAction::Pull)
                .await?;
        }
        info!(vault_id = %vault_id, node_id = %node_id, nodes = gestalt.nodes.len(), "vault permissions granted");
        Ok(())
    }

    /// Revoke `pull` on `vault_id` from every node in `node_id`'s gestalt.
    /// Nothing happens if the node is not in the trust graph.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Acl`] or [`VaultError::Gestalt`].
    pub async fn unset_vault_permissions(
        &self,
        node_id: &NodeId,
        vault_id: &VaultId,
    ) -> Result<(), VaultError> {
        let mut tx = Transaction::new();
        self.unset_vault_permissions_tx(&mut tx, node_id, vault_id)
            .await
    }

    /// [`unset_vault_permissions`](Self::unset_vault_permissions) inside
    /// `tx`.
    ///
    /// # Errors
    ///
    /// As [`unset_vault_permissions`](Self::unset_vault_permissions), plus
    /// [`VaultError::Lock`].
    pub async fn unset_vault_permissions_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
        vault_id: &VaultId,
    ) -> Result<(), VaultError> {
        tx.acquire(self.gestalt_graph.lock()).await?;
        tx.acquire(self.acl.lock()).await?;
        tx.acquire(&self.lock).await?;
        let Some(gestalt) = self
            .gestalt_graph
            .get_gestalt_by_node_tx(tx, node_id)
            .await?
        else {
            return Ok(());
        };
        for member in &gestalt.nodes {
            self.acl
                .unset_vault_action_tx(tx, vault_id, member, VaultAction::Pull)
                .await?;
        }
        info!(vault_id = %vault_id, node_id = %node_id, nodes = gestalt.nodes.len(), "vault permissions revoked");
        Ok(())
    }

    /// Vault actions per authorized node, optionally for one node only.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Acl`] if the ACL read fails.
    pub async fn get_vault_permissions(
        &self,
        vault_id: &VaultId,
        node_id: Option<&NodeId>,
    ) -> Result<BTreeMap<NodeId, BTreeSet<VaultAction>>, VaultError> {
        let report = self.acl.get_vault_permissions(vault_id).await?;
        Ok(report
            .granted
            .into_iter()
            .filter(|(n, _)| node_id.is_none_or(|wanted| wanted == n))
            .map(|(n, perm)| {
                let actions = perm.vaults.get(vault_id).cloned().unwrap_or_default();
                (n, actions)
            })
            .collect())
    }

    // ── Remote operations ────────────────────────────────────────────

    /// Connect to `remote` and confirm it lets this node pull `vault_id`.
    async fn authorized_client(
        &self,
        remote: &NodeId,
        vault_id: &VaultId,
    ) -> Result<Arc<dyn NodeClient>, VaultError> {
        let client = self.connections.connect(remote).await?;
        if !client
            .check_vault_permissions(&self.node_id, vault_id)
            .await?
        {
            warn!(vault_id = %vault_id, remote = %remote, "remote refused pull");
            return Err(VaultError::GitPermissionDenied {
                node_id: remote.clone(),
                vault_id: vault_id.clone(),
            });
        }
        Ok(client)
    }

    async fn fetch(
        &self,
        client: &dyn NodeClient,
        remote: &NodeId,
        vault_id: &VaultId,
    ) -> Result<VaultSnapshot, VaultError> {
        let snapshot = client
            .fetch_vault(&self.node_id, vault_id)
            .await
            .map_err(|e| match e {
                TransportError::PermissionDenied { .. } => VaultError::GitPermissionDenied {
                    node_id: remote.clone(),
                    vault_id: vault_id.clone(),
                },
                other => VaultError::Transport(other),
            })?;
        if snapshot.vault_id != *vault_id {
            return Err(TransportError::Protocol {
                node_id: remote.clone(),
                reason: format!("asked for vault {vault_id}, got {}", snapshot.vault_id),
            }
            .into());
        }
        Ok(snapshot)
    }

    /// Copy a remote vault into a new local vault with the same id and
    /// name, remembering `remote` as its default pull source.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NodeConnectionNotExist`] if `remote` is unknown.
    /// - [`VaultError::GitPermissionDenied`] if `remote` refuses.
    /// - [`VaultError::VaultDefined`] if the id or name exists locally.
    /// - [`VaultError::Transport`], [`VaultError::Io`] or [`VaultError::Db`].
    pub async fn clone_vault(
        &self,
        vault_id: &VaultId,
        remote: &NodeId,
    ) -> Result<Arc<Vault>, VaultError> {
        let client = self.authorized_client(remote, vault_id).await?;
        let snapshot = self.fetch(client.as_ref(), remote, vault_id).await?;
        validate_name(&snapshot.name)?;

        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        if self.record_name(vault_id).await?.is_some() || self.name_taken(&snapshot.name).await? {
            return Err(VaultError::VaultDefined {
                name: snapshot.name,
            });
        }
        let vault = self
            .register(
                vault_id.clone(),
                snapshot.name.clone(),
                Some(remote),
                Some(&snapshot),
            )
            .await?;
        info!(vault_id = %vault_id, remote = %remote, secrets = snapshot.secrets.len(), "vault cloned");
        Ok(vault)
    }

    /// Replace a local vault's content with the remote's. Without an
    /// explicit `remote` the recorded default is used. The remote becomes
    /// the new default.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultUndefined`] if the vault is unknown locally.
    /// - [`VaultError::NoDefaultRemote`] if no remote is given or recorded.
    /// - [`VaultError::NodeConnectionNotExist`] or
    ///   [`VaultError::GitPermissionDenied`] as for
    ///   [`clone_vault`](Self::clone_vault).
    pub async fn pull_vault(
        &self,
        vault_id: &VaultId,
        remote: Option<&NodeId>,
    ) -> Result<(), VaultError> {
        let vault = self.get_vault(vault_id).await?;
        let remote = match remote {
            Some(remote) => remote.clone(),
            None => self
                .get_default_remote(vault_id)
                .await?
                .ok_or_else(|| VaultError::NoDefaultRemote {
                    vault_id: vault_id.clone(),
                })?,
        };
        let client = self.authorized_client(&remote, vault_id).await?;
        let snapshot = self.fetch(client.as_ref(), &remote, vault_id).await?;

        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        vault.restore(&snapshot).await?;
        self.db
            .put(&self.remotes, vault_id.as_str(), &remote)
            .await?;
        info!(vault_id = %vault_id, remote = %remote, secrets = snapshot.secrets.len(), "vault pulled");
        Ok(())
    }

    /// Names of the vaults `remote` lets this node pull.
    ///
    /// # Errors
    ///
    /// [`VaultError::NodeConnectionNotExist`] or [`VaultError::Transport`].
    pub async fn scan_vault_names(&self, remote: &NodeId) -> Result<Vec<String>, VaultError> {
        let client = self.connections.connect(remote).await?;
        Ok(client.scan_vaults(&self.node_id).await?)
    }

    // ── Owner side of remote operations ──────────────────────────────

    /// Whether `requester` holds `pull` on `vault_id` here. Answered from
    /// the requester's own permission record, not the vault's index.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Acl`] if the ACL read fails.
    pub async fn check_vault_permission(
        &self,
        requester: &NodeId,
        vault_id: &VaultId,
    ) -> Result<bool, VaultError> {
        Ok(self
            .acl
            .get_node_permission(requester)
            .await?
            .is_some_and(|p| p.allows(vault_id, VaultAction::Pull)))
    }

    /// Names of the local vaults `requester` may pull, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Acl`] or [`VaultError::Db`].
    pub async fn scan_vaults_for(&self, requester: &NodeId) -> Result<Vec<String>, VaultError> {
        let Some(permission) = self.acl.get_node_permission(requester).await? else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for (vault_id, actions) in &permission.vaults {
            if !actions.contains(&VaultAction::Pull) {
                continue;
            }
            if let Some(name) = self.get_vault_name(vault_id).await? {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Content of `vault_id` for `requester`, if it may pull it.
    ///
    /// # Errors
    ///
    /// - [`VaultError::GitPermissionDenied`] without `pull`.
    /// - [`VaultError::VaultUndefined`] if the vault is unknown.
    pub async fn fetch_vault_for(
        &self,
        requester: &NodeId,
        vault_id: &VaultId,
    ) -> Result<VaultSnapshot, VaultError> {
        if !self.check_vault_permission(requester, vault_id).await? {
            warn!(vault_id = %vault_id, requester = %requester, "pull refused");
            return Err(VaultError::GitPermissionDenied {
                node_id: self.node_id.clone(),
                vault_id: vault_id.clone(),
            });
        }
        let snapshot = self.get_vault(vault_id).await?.snapshot().await?;
        info!(vault_id = %vault_id, requester = %requester, "vault served");
        Ok(snapshot)
    }
}

impl std::fmt::Debug for VaultManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultManager")
            .field("node_id", &self.node_id)
            .field("vaults_dir", &self.vaults_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::tests::memory_db;
    use crate::error::LockError;
    use crate::gestalt::GestaltGraph;
    use crate::remote::StaticNodeConnections;

    struct Harness {
        manager: VaultManager,
        graph: Arc<GestaltGraph>,
        acl: Arc<Acl>,
        _tmp: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let db = memory_db();
        let acl = Arc::new(Acl::new(db.clone()));
        let graph = Arc::new(GestaltGraph::new(db.clone(), Arc::clone(&acl)));
        let manager = VaultManager::new(VaultManagerConfig {
            node_id: NodeId::generate(),
            vaults_dir: tmp.path().join("vaults"),
            db,
            acl: Arc::clone(&acl),
            gestalt_graph: graph.clone(),
            connections: Arc::new(StaticNodeConnections::new()),
        });
        manager.start().await.unwrap();
        Harness {
            manager,
            graph,
            acl,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn create_get_rename_roundtrip() {
        let h = harness().await;
        let vault = h.manager.create_vault("X").await.unwrap();
        let id = vault.id().clone();

        let fetched = h.manager.get_vault(&id).await.unwrap();
        assert!(Arc::ptr_eq(&vault, &fetched));

        h.manager.rename_vault(&id, "Y").await.unwrap();
        assert_eq!(h.manager.get_vault_id("Y").await.unwrap(), Some(id.clone()));
        assert_eq!(h.manager.get_vault_id("X").await.unwrap(), None);
        assert_eq!(fetched.name().await, "Y");
        assert_eq!(
            h.manager.get_vault_name(&id).await.unwrap().as_deref(),
            Some("Y")
        );
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let h = harness().await;
        h.manager.create_vault("dup").await.unwrap();
        let err = h.manager.create_vault("dup").await.unwrap_err();
        assert!(matches!(err, VaultError::VaultDefined { ref name } if name == "dup"));
        assert_eq!(h.manager.list_vaults().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rename_onto_existing_name_is_rejected() {
        let h = harness().await;
        let a = h.manager.create_vault("a").await.unwrap();
        h.manager.create_vault("b").await.unwrap();
        let err = h.manager.rename_vault(a.id(), "b").await.unwrap_err();
        assert!(matches!(err, VaultError::VaultDefined { .. }));
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let h = harness().await;
        assert!(matches!(
            h.manager.create_vault("a/b").await,
            Err(VaultError::InvalidName { .. })
        ));
        assert!(matches!(
            h.manager.create_vault("").await,
            Err(VaultError::InvalidName { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_vault_is_undefined() {
        let h = harness().await;
        let id = VaultId::generate();
        assert!(matches!(
            h.manager.get_vault(&id).await,
            Err(VaultError::VaultUndefined { .. })
        ));
        assert!(matches!(
            h.manager.rename_vault(&id, "n").await,
            Err(VaultError::VaultUndefined { .. })
        ));
        assert!(matches!(
            h.manager.delete_vault(&id).await,
            Err(VaultError::VaultUndefined { .. })
        ));
    }

    #[tokio::test]
    async fn handles_reload_from_registry_after_stop() {
        let h = harness().await;
        let vault = h.manager.create_vault("persist").await.unwrap();
        let id = vault.id().clone();
        vault.write_secret("s", b"v").await.unwrap();

        h.manager.stop().await;
        assert!(!vault.is_running().await);

        let reloaded = h.manager.get_vault(&id).await.unwrap();
        assert!(!Arc::ptr_eq(&vault, &reloaded));
        assert_eq!(reloaded.read_secret("s").await.unwrap(), b"v");
        let stats = h.manager.get_vault_stats(&id).await.unwrap();
        assert_eq!(stats.secret_count, 1);
        assert_eq!(stats.name, "persist");
    }

    #[tokio::test]
    async fn list_vaults_is_sorted_by_name() {
        let h = harness().await;
        h.manager.create_vault("b").await.unwrap();
        h.manager.create_vault("a").await.unwrap();
        let names: Vec<String> = h
            .manager
            .list_vaults()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[tokio::test]
    async fn delete_removes_directory_records_and_permissions() {
        let h = harness().await;
        let vault = h.manager.create_vault("gone").await.unwrap();
        let id = vault.id().clone();
        let node = NodeId::generate();
        h.graph.set_node(&node).await.unwrap();
        h.manager.set_vault_permissions(&node, &id).await.unwrap();

        assert!(h.manager.delete_vault(&id).await.unwrap());

        assert!(!vault.dir().exists());
        assert_eq!(h.manager.get_vault_id("gone").await.unwrap(), None);
        assert!(h.manager.list_vaults().await.unwrap().is_empty());
        let perm = h.acl.get_node_permission(&node).await.unwrap().unwrap();
        assert!(!perm.vaults.contains_key(&id));
        // Name is free again.
        h.manager.create_vault("gone").await.unwrap();
    }

    #[tokio::test]
    async fn set_vault_permissions_requires_gestalt_node() {
        let h = harness().await;
        let vault = h.manager.create_vault("v").await.unwrap();
        let err = h
            .manager
            .set_vault_permissions(&NodeId::generate(), vault.id())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::GestaltNodeIdMissing { .. }));
        // Revoking for an unknown node is a no-op.
        h.manager
            .unset_vault_permissions(&NodeId::generate(), vault.id())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn permissions_filter_by_node() {
        let h = harness().await;
        let vault = h.manager.create_vault("v").await.unwrap();
        let a = NodeId::generate();
        let b = NodeId::generate();
        h.graph.set_node(&a).await.unwrap();
        h.graph.set_node(&b).await.unwrap();
        h.manager.set_vault_permissions(&a, vault.id()).await.unwrap();
        h.manager.set_vault_permissions(&b, vault.id()).await.unwrap();

        assert_eq!(
            h.manager
                .get_vault_permissions(vault.id(), None)
                .await
                .unwrap()
                .len(),
            2
        );
        let only_a = h
            .manager
            .get_vault_permissions(vault.id(), Some(&a))
            .await
            .unwrap();
        assert_eq!(
            only_a,
            BTreeMap::from([(a, BTreeSet::from([VaultAction::Pull]))])
        );
    }

    #[tokio::test]
    async fn owner_side_checks_follow_the_acl() {
        let h = harness().await;
        let vault = h.manager.create_vault("shared").await.unwrap();
        vault.write_secret("k", b"v").await.unwrap();
        let peer = NodeId::generate();

        assert!(!h.manager.check_vault_permission(&peer, vault.id()).await.unwrap());
        assert!(matches!(
            h.manager.fetch_vault_for(&peer, vault.id()).await,
            Err(VaultError::GitPermissionDenied { .. })
        ));
        assert!(h.manager.scan_vaults_for(&peer).await.unwrap().is_empty());

        h.graph.set_node(&peer).await.unwrap();
        h.manager
            .set_vault_permissions(&peer, vault.id())
            .await
            .unwrap();

        assert!(h.manager.check_vault_permission(&peer, vault.id()).await.unwrap());
        assert_eq!(
            h.manager.scan_vaults_for(&peer).await.unwrap(),
            vec!["shared".to_owned()]
        );
        let snapshot = h.manager.fetch_vault_for(&peer, vault.id()).await.unwrap();
        assert_eq!(snapshot.secrets["k"], hex::encode(b"v"));
    }

    #[tokio::test]
    async fn remote_operations_need_a_connection() {
        let h = harness().await;
        let remote = NodeId::generate();
        let err = h
            .manager
            .clone_vault(&VaultId::generate(), &remote)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NodeConnectionNotExist { .. }));
        assert!(matches!(
            h.manager.scan_vault_names(&remote).await,
            Err(VaultError::NodeConnectionNotExist { .. })
        ));
    }

    #[tokio::test]
    async fn pull_without_default_remote_fails() {
        let h = harness().await;
        let vault = h.manager.create_vault("local").await.unwrap();
        assert_eq!(h.manager.get_default_remote(vault.id()).await.unwrap(), None);
        let err = h.manager.pull_vault(vault.id(), None).await.unwrap_err();
        assert!(matches!(err, VaultError::NoDefaultRemote { .. }));
    }

    #[tokio::test]
    async fn delete_inside_registry_transaction_violates_lock_order() {
        let h = harness().await;
        let vault = h.manager.create_vault("v").await.unwrap();
        let mut tx = Transaction::new();
        tx.acquire(h.manager.lock()).await.unwrap();
        let err = h.manager.delete_vault_tx(&mut tx, vault.id()).await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::Lock(LockError::OrderViolation {
                requested: LockRank::Acl,
                held: LockRank::Vaults
            })
        ));
    }

    #[tokio::test]
    async fn composed_transaction_spans_acl_and_registry() {
        let h = harness().await;
        let mut tx = Transaction::new();
        let vault = h.manager.create_vault("v").await.unwrap();
        assert!(h.manager.delete_vault_tx(&mut tx, vault.id()).await.unwrap());
        assert!(h.acl.lock().is_locked());
        assert!(h.manager.lock().is_locked());
        drop(tx);
        assert!(!h.acl.lock().is_locked());
    }

    #[tokio::test]
    async fn failed_delete_leaves_the_vault_usable() {
        let h = harness().await;
        let vault = h.manager.create_vault("stuck").await.unwrap();
        let id = vault.id().clone();
        vault.write_secret("s", b"v").await.unwrap();

        // A regular file where the directory should be makes removal fail.
        let dir = vault.dir().to_path_buf();
        let aside = dir.with_extension("aside");
        std::fs::rename(&dir, &aside).unwrap();
        std::fs::write(&dir, b"not a directory").unwrap();

        assert!(!h.manager.delete_vault(&id).await.unwrap());
        assert_eq!(h.manager.get_vault_id("stuck").await.unwrap(), Some(id.clone()));

        std::fs::remove_file(&dir).unwrap();
        std::fs::rename(&aside, &dir).unwrap();

        let reopened = h.manager.get_vault(&id).await.unwrap();
        assert!(reopened.is_running().await);
        assert_eq!(reopened.read_secret("s").await.unwrap(), b"v");

        assert!(h.manager.delete_vault(&id).await.unwrap());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn vault_action_on_a_shared_record_admits_every_member() {
        let h = harness().await;
        let vault = h.manager.create_vault("team").await.unwrap();
        vault.write_secret("k", b"v").await.unwrap();
        let a = NodeId::generate();
        let b = NodeId::generate();
        h.graph.link_nodes(&a, &b).await.unwrap();

        h.acl
            .set_vault_action(vault.id(), &a, VaultAction::Pull)
            .await
            .unwrap();

        // Only `a` is indexed under the vault, yet `b` shares the record.
        assert!(h.manager.check_vault_permission(&b, vault.id()).await.unwrap());
        assert_eq!(
            h.manager.scan_vaults_for(&b).await.unwrap(),
            vec!["team".to_owned()]
        );
        let snapshot = h.manager.fetch_vault_for(&b, vault.id()).await.unwrap();
        assert_eq!(snapshot.secrets["k"], hex::encode(b"v"));
    }

    #[tokio::test]
    async fn destroy_clears_everything() {
        let h = harness().await;
        let vault = h.manager.create_vault("v").await.unwrap();
        let dir = vault.dir().to_path_buf();
        h.manager.destroy().await.unwrap();
        assert!(!dir.exists());
        assert!(h.manager.list_vaults().await.unwrap().is_empty());
    }
}
