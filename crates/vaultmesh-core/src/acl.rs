//! Access control list for `VaultMesh`.
//!
//! Maps nodes to permissions and vaults to the nodes allowed to act on them.
//! Every node of one gestalt points at the *same* permission record, so a
//! change made through any member is seen by all of them. Records are
//! reference counted and deleted when the last node lets go.
//!
//! Three domains under `acl/` hold the state:
//!
//! - `acl/nodes/<node_id>` → [`PermissionId`]
//! - `acl/perms/<permission_id>` → [`PermissionRef`] (shared object + count)
//! - `acl/vaults/<vault_id>` → set of [`NodeId`] (reverse index)
//!
//! The reverse index is advisory. Reads reconcile it against the permission
//! each listed node actually holds and prune entries that no longer match;
//! writes that strip a shared permission leave stale entries behind for the
//! next read to clean up.
//!
//! All operations serialize through the ACL's [`TransactionLock`]. Each
//! public method has a `*_tx` twin that runs inside a caller's
//! [`Transaction`], which is how the trust graph and the vault manager
//! compose ACL updates with their own.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::{Batch, Db, Domain};
use crate::error::{AclError, DbError};
use crate::ids::{NodeId, PermissionId, VaultId};
use crate::lock::{LockRank, Transaction, TransactionLock};

/// An action scoped to a whole gestalt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestaltAction {
    /// May send notifications to this node.
    Notify,
    /// May list the vaults this node exposes.
    Scan,
}

/// An action on one vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultAction {
    /// May clone and pull the vault.
    Pull,
}

/// The authorization record shared by every node of a gestalt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Gestalt-level actions.
    pub gestalt: BTreeSet<GestaltAction>,
    /// Per-vault actions.
    pub vaults: BTreeMap<VaultId, BTreeSet<VaultAction>>,
}

impl Permission {
    /// A permission granting nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this permission allows `action` on `vault_id`.
    #[must_use]
    pub fn allows(&self, vault_id: &VaultId, action: VaultAction) -> bool {
        self.vaults
            .get(vault_id)
            .is_some_and(|actions| actions.contains(&action))
    }
}

/// A permission plus the number of nodes pointing at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRef {
    /// Nodes whose `acl/nodes` entry names this record.
    pub count: u64,
    /// The shared permission.
    pub object: Permission,
}

/// Result of reading a vault's permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultPermissions {
    /// Every node authorized on the vault, with its full permission.
    pub granted: BTreeMap<NodeId, Permission>,
    /// Stale reverse-index entries removed during the read.
    pub pruned: Vec<NodeId>,
}

/// One cached row of a domain: its current value and whether it changed.
struct Slot<V> {
    value: Option<V>,
    dirty: bool,
}

/// Write-back cache over one domain. Reads fall through to the store once;
/// writes stay in memory until [`Staging::commit`].
struct Rows<K, V> {
    domain: Domain,
    slots: BTreeMap<K, Slot<V>>,
}

impl<K, V> Rows<K, V>
where
    K: Ord + Clone + AsRef<str>,
    V: Clone + Serialize + DeserializeOwned,
{
    fn new(domain: Domain) -> Self {
        Self {
            domain,
            slots: BTreeMap::new(),
        }
    }

    async fn get(&mut self, db: &Db, key: &K) -> Result<Option<V>, DbError> {
        if let Some(slot) = self.slots.get(key) {
            return Ok(slot.value.clone());
        }
        let value: Option<V> = db.get(&self.domain, key.as_ref()).await?;
        self.slots.insert(
            key.clone(),
            Slot {
                value: value.clone(),
                dirty: false,
            },
        );
        Ok(value)
    }

    fn set(&mut self, key: K, value: Option<V>) {
        self.slots.insert(key, Slot { value, dirty: true });
    }

    fn write(self, batch: &mut Batch) -> Result<(), DbError> {
        for (key, slot) in self.slots {
            if !slot.dirty {
                continue;
            }
            match slot.value {
                Some(value) => batch.put(&self.domain, key.as_ref(), &value)?,
                None => batch.del(&self.domain, key.as_ref())?,
            };
        }
        Ok(())
    }
}

/// The in-memory arena one ACL operation works against.
///
/// Node entries hold only a [`PermissionId`]; every change to a shared
/// permission goes through `perms` and its explicit count. Nothing touches
/// the store until `commit`, which writes all changed rows in one batch.
struct Staging<'a> {
    db: &'a Db,
    nodes: Rows<NodeId, PermissionId>,
    perms: Rows<PermissionId, PermissionRef>,
    vaults: Rows<VaultId, BTreeSet<NodeId>>,
}

impl<'a> Staging<'a> {
    fn new(acl: &'a Acl) -> Self {
        Self {
            db: &acl.db,
            nodes: Rows::new(acl.nodes.clone()),
            perms: Rows::new(acl.perms.clone()),
            vaults: Rows::new(acl.vaults.clone()),
        }
    }

    async fn node(&mut self, node_id: &NodeId) -> Result<Option<PermissionId>, DbError> {
        self.nodes.get(self.db, node_id).await
    }

    async fn perm(&mut self, perm_id: &PermissionId) -> Result<Option<PermissionRef>, DbError> {
        self.perms.get(self.db, perm_id).await
    }

    /// The node's permission id together with its record, if both exist.
    async fn node_ref(
        &mut self,
        node_id: &NodeId,
    ) -> Result<Option<(PermissionId, PermissionRef)>, DbError> {
        let Some(perm_id) = self.node(node_id).await? else {
            return Ok(None);
        };
        Ok(self.perm(&perm_id).await?.map(|r| (perm_id, r)))
    }

    async fn vault_index(&mut self, vault_id: &VaultId) -> Result<Option<BTreeSet<NodeId>>, DbError> {
        self.vaults.get(self.db, vault_id).await
    }

    fn set_node(&mut self, node_id: NodeId, perm_id: Option<PermissionId>) {
        self.nodes.set(node_id, perm_id);
    }

    fn set_perm(&mut self, perm_id: PermissionId, perm_ref: PermissionRef) {
        self.perms.set(perm_id, Some(perm_ref));
    }

    /// Drop one reference to `perm_id`, deleting the record at zero.
    async fn release(&mut self, perm_id: &PermissionId) -> Result<(), DbError> {
        let Some(mut perm_ref) = self.perm(perm_id).await? else {
            return Ok(());
        };
        perm_ref.count = perm_ref.count.saturating_sub(1);
        if perm_ref.count == 0 {
            debug!(permission_id = %perm_id, "permission released");
            self.perms.set(perm_id.clone(), None);
        } else {
            self.perms.set(perm_id.clone(), Some(perm_ref));
        }
        Ok(())
    }

    /// Create a fresh record shared by `count` nodes.
    fn create(&mut self, count: u64, object: Permission) -> PermissionId {
        let perm_id = PermissionId::generate();
        self.perms
            .set(perm_id.clone(), Some(PermissionRef { count, object }));
        perm_id
    }

    fn set_vault_index(&mut self, vault_id: VaultId, node_ids: BTreeSet<NodeId>) {
        if node_ids.is_empty() {
            self.vaults.set(vault_id, None);
        } else {
            self.vaults.set(vault_id, Some(node_ids));
        }
    }

    async fn index_nodes<'n>(
        &mut self,
        vault_id: &VaultId,
        node_ids: impl IntoIterator<Item = &'n NodeId>,
    ) -> Result<(), DbError> {
        let mut index = self.vault_index(vault_id).await?.unwrap_or_default();
        index.extend(node_ids.into_iter().cloned());
        self.set_vault_index(vault_id.clone(), index);
        Ok(())
    }

    /// Reconcile the vault's reverse index against the permissions its
    /// nodes hold. Returns the surviving nodes and the pruned ones; the
    /// cleaned index is staged for writing when anything was pruned.
    async fn reconcile(
        &mut self,
        vault_id: &VaultId,
    ) -> Result<Option<(BTreeMap<NodeId, (PermissionId, PermissionRef)>, Vec<NodeId>)>, DbError>
    {
        let Some(index) = self.vault_index(vault_id).await? else {
            return Ok(None);
        };
        let mut live = BTreeMap::new();
        let mut pruned = Vec::new();
        for node_id in &index {
            match self.node_ref(node_id).await? {
                Some((perm_id, perm_ref)) if perm_ref.object.vaults.contains_key(vault_id) => {
                    live.insert(node_id.clone(), (perm_id, perm_ref));
                }
                _ => pruned.push(node_id.clone()),
            }
        }
        if !pruned.is_empty() {
            debug!(vault_id = %vault_id, pruned = pruned.len(), "stale vault permission entries pruned");
            self.set_vault_index(vault_id.clone(), live.keys().cloned().collect());
        }
        Ok(Some((live, pruned)))
    }

    async fn commit(self) -> Result<(), DbError> {
        let mut batch = Batch::new();
        self.nodes.write(&mut batch)?;
        self.perms.write(&mut batch)?;
        self.vaults.write(&mut batch)?;
        if batch.is_empty() {
            return Ok(());
        }
        self.db.batch(batch).await
    }
}

/// The access control list.
pub struct Acl {
    db: Db,
    lock: TransactionLock,
    root: Domain,
    nodes: Domain,
    perms: Domain,
    vaults: Domain,
}

impl Acl {
    /// Create an ACL over `db`, using the `acl/` domain.
    #[must_use]
    pub fn new(db: Db) -> Self {
        let root = Domain::new("acl");
        Self {
            db,
            lock: TransactionLock::new(LockRank::Acl),
            nodes: root.level("nodes"),
            perms: root.level("perms"),
            vaults: root.level("vaults"),
            root,
        }
    }

    /// The lock every ACL operation runs under.
    #[must_use]
    pub fn lock(&self) -> &TransactionLock {
        &self.lock
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// The node's permission, or `None` if the node is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn get_node_permission(
        &self,
        node_id: &NodeId,
    ) -> Result<Option<Permission>, AclError> {
        let mut tx = Transaction::new();
        self.get_node_permission_tx(&mut tx, node_id).await
    }

    /// [`get_node_permission`](Self::get_node_permission) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] or [`AclError::Lock`].
    pub async fn get_node_permission_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
    ) -> Result<Option<Permission>, AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        Ok(staging.node_ref(node_id).await?.map(|(_, r)| r.object))
    }

    /// Every node currently authorized on the vault, with its permission.
    ///
    /// Reverse-index entries whose node has no permission, or whose
    /// permission no longer lists the vault, are removed from the index and
    /// reported in [`VaultPermissions::pruned`].
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn get_vault_permissions(
        &self,
        vault_id: &VaultId,
    ) -> Result<VaultPermissions, AclError> {
        let mut tx = Transaction::new();
        self.get_vault_permissions_tx(&mut tx, vault_id).await
    }

    /// [`get_vault_permissions`](Self::get_vault_permissions) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] or [`AclError::Lock`].
    pub async fn get_vault_permissions_tx(
        &self,
        tx: &mut Transaction,
        vault_id: &VaultId,
    ) -> Result<VaultPermissions, AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let Some((live, pruned)) = staging.reconcile(vault_id).await? else {
            return Ok(VaultPermissions::default());
        };
        staging.commit().await?;
        Ok(VaultPermissions {
            granted: live.into_iter().map(|(n, (_, r))| (n, r.object)).collect(),
            pruned,
        })
    }

    /// Reconciled permissions for every vault in the reverse index.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn get_vault_perms(
        &self,
    ) -> Result<BTreeMap<VaultId, BTreeMap<NodeId, Permission>>, AclError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        let mut out = BTreeMap::new();
        for key in self.db.keys(&self.vaults).await? {
            let Ok(vault_id) = key.parse::<VaultId>() else {
                continue;
            };
            let perms = self.get_vault_permissions_tx(&mut tx, &vault_id).await?;
            if !perms.granted.is_empty() {
                out.insert(vault_id, perms.granted);
            }
        }
        Ok(out)
    }

    /// All permission groups: one map per shared record, listing every node
    /// pointing at it.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn get_node_perms(&self) -> Result<Vec<BTreeMap<NodeId, Permission>>, AclError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        let mut groups: BTreeMap<PermissionId, BTreeMap<NodeId, Permission>> = BTreeMap::new();
        let mut staging = Staging::new(self);
        for (node, perm_id) in self.db.entries::<PermissionId>(&self.nodes).await? {
            let Ok(node_id) = node.parse::<NodeId>() else {
                continue;
            };
            if let Some(perm_ref) = staging.perm(&perm_id).await? {
                groups
                    .entry(perm_id)
                    .or_default()
                    .insert(node_id, perm_ref.object);
            }
        }
        Ok(groups.into_values().collect())
    }

    /// Whether both nodes point at the same permission record.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn same_node_perm(&self, a: &NodeId, b: &NodeId) -> Result<bool, AclError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let pa = staging.node(a).await?;
        let pb = staging.node(b).await?;
        Ok(pa.is_some() && pa == pb)
    }

    /// The raw reverse index for a vault, without reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn vault_index(&self, vault_id: &VaultId) -> Result<BTreeSet<NodeId>, AclError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        Ok(self
            .db
            .get::<BTreeSet<NodeId>>(&self.vaults, vault_id.as_str())
            .await?
            .unwrap_or_default())
    }

    /// Every permission record with its reference count.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn permission_refs(&self) -> Result<BTreeMap<PermissionId, PermissionRef>, AclError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        Ok(self
            .db
            .entries::<PermissionRef>(&self.perms)
            .await?
            .into_iter()
            .filter_map(|(k, v)| k.parse::<PermissionId>().ok().map(|id| (id, v)))
            .collect())
    }

    /// The permission id each node points at.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn node_permission_ids(&self) -> Result<BTreeMap<NodeId, PermissionId>, AclError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        Ok(self
            .db
            .entries::<PermissionId>(&self.nodes)
            .await?
            .into_iter()
            .filter_map(|(k, v)| k.parse::<NodeId>().ok().map(|id| (id, v)))
            .collect())
    }

    // ── Gestalt actions ──────────────────────────────────────────────

    /// Grant a gestalt action, creating the node's permission if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn set_node_action(
        &self,
        node_id: &NodeId,
        action: GestaltAction,
    ) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.set_node_action_tx(&mut tx, node_id, action).await
    }

    /// [`set_node_action`](Self::set_node_action) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] or [`AclError::Lock`].
    pub async fn set_node_action_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
        action: GestaltAction,
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        match staging.node_ref(node_id).await? {
            Some((perm_id, mut perm_ref)) => {
                perm_ref.object.gestalt.insert(action);
                staging.set_perm(perm_id, perm_ref);
            }
            None => {
                let mut object = Permission::new();
                object.gestalt.insert(action);
                if let Some(stale) = staging.node(node_id).await? {
                    staging.release(&stale).await?;
                }
                let perm_id = staging.create(1, object);
                staging.set_node(node_id.clone(), Some(perm_id));
            }
        }
        staging.commit().await?;
        debug!(node_id = %node_id, action = ?action, "gestalt action set");
        Ok(())
    }

    /// Revoke a gestalt action. No-op for unknown nodes.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn unset_node_action(
        &self,
        node_id: &NodeId,
        action: GestaltAction,
    ) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.unset_node_action_tx(&mut tx, node_id, action).await
    }

    /// [`unset_node_action`](Self::unset_node_action) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] or [`AclError::Lock`].
    pub async fn unset_node_action_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
        action: GestaltAction,
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let Some((perm_id, mut perm_ref)) = staging.node_ref(node_id).await? else {
            return Ok(());
        };
        if perm_ref.object.gestalt.remove(&action) {
            staging.set_perm(perm_id, perm_ref);
            staging.commit().await?;
            debug!(node_id = %node_id, action = ?action, "gestalt action unset");
        }
        Ok(())
    }

    // ── Vault actions ────────────────────────────────────────────────

    /// Grant `action` on `vault_id` to the node's (shared) permission and
    /// add the node to the vault's reverse index.
    ///
    /// # Errors
    ///
    /// - [`AclError::NodeIdMissing`] if the node has no permission yet.
    /// - [`AclError::Db`] if the store fails.
    pub async fn set_vault_action(
        &self,
        vault_id: &VaultId,
        node_id: &NodeId,
        action: VaultAction,
    ) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.set_vault_action_tx(&mut tx, vault_id, node_id, action)
            .await
    }

    /// [`set_vault_action`](Self::set_vault_action) inside `tx`.
    ///
    /// # Errors
    ///
    /// - [`AclError::NodeIdMissing`] if the node has no permission yet.
    /// - [`AclError::Db`] or [`AclError::Lock`].
    pub async fn set_vault_action_tx(
        &self,
        tx: &mut Transaction,
        vault_id: &VaultId,
        node_id: &NodeId,
        action: VaultAction,
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let Some((perm_id, mut perm_ref)) = staging.node_ref(node_id).await? else {
            return Err(AclError::NodeIdMissing {
                node_id: node_id.clone(),
            });
        };
        perm_ref
            .object
            .vaults
            .entry(vault_id.clone())
            .or_default()
            .insert(action);
        staging.set_perm(perm_id, perm_ref);
        staging.index_nodes(vault_id, [node_id]).await?;
        staging.commit().await?;
        debug!(vault_id = %vault_id, node_id = %node_id, action = ?action, "vault action set");
        Ok(())
    }

    /// Revoke `action` on `vault_id`. No-op when the node or the vault's
    /// index is absent.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn unset_vault_action(
        &self,
        vault_id: &VaultId,
        node_id: &NodeId,
        action: VaultAction,
    ) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.unset_vault_action_tx(&mut tx, vault_id, node_id, action)
            .await
    }

    /// [`unset_vault_action`](Self::unset_vault_action) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] or [`AclError::Lock`].
    pub async fn unset_vault_action_tx(
        &self,
        tx: &mut Transaction,
        vault_id: &VaultId,
        node_id: &NodeId,
        action: VaultAction,
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let Some((perm_id, mut perm_ref)) = staging.node_ref(node_id).await? else {
            return Ok(());
        };
        let Some(mut index) = staging.vault_index(vault_id).await? else {
            return Ok(());
        };
        let Some(actions) = perm_ref.object.vaults.get_mut(vault_id) else {
            return Ok(());
        };
        actions.remove(&action);
        if actions.is_empty() {
            perm_ref.object.vaults.remove(vault_id);
            index.remove(node_id);
            staging.set_vault_index(vault_id.clone(), index);
        }
        staging.set_perm(perm_id, perm_ref);
        staging.commit().await?;
        debug!(vault_id = %vault_id, node_id = %node_id, action = ?action, "vault action unset");
        Ok(())
    }

    // ── Whole permissions ────────────────────────────────────────────

    /// Seed one shared permission for a brand-new gestalt.
    ///
    /// # Errors
    ///
    /// - [`AclError::NodeIdExists`] if any node already has a permission.
    /// - [`AclError::Db`] if the store fails.
    pub async fn set_nodes_perm(
        &self,
        node_ids: &[NodeId],
        permission: Permission,
    ) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.set_nodes_perm_tx(&mut tx, node_ids, permission).await
    }

    /// [`set_nodes_perm`](Self::set_nodes_perm) inside `tx`.
    ///
    /// # Errors
    ///
    /// - [`AclError::NodeIdExists`] if any node already has a permission.
    /// - [`AclError::Db`] or [`AclError::Lock`].
    pub async fn set_nodes_perm_tx(
        &self,
        tx: &mut Transaction,
        node_ids: &[NodeId],
        permission: Permission,
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let members: BTreeSet<NodeId> = node_ids.iter().cloned().collect();
        if members.is_empty() {
            return Ok(());
        }
        for node_id in &members {
            if staging.node(node_id).await?.is_some() {
                return Err(AclError::NodeIdExists {
                    node_id: node_id.clone(),
                });
            }
        }
        let vault_ids: Vec<VaultId> = permission.vaults.keys().cloned().collect();
        let perm_id = staging.create(members.len() as u64, permission);
        for node_id in &members {
            staging.set_node(node_id.clone(), Some(perm_id.clone()));
        }
        for vault_id in &vault_ids {
            staging.index_nodes(vault_id, &members).await?;
        }
        staging.commit().await?;
        info!(permission_id = %perm_id, nodes = members.len(), "shared permission seeded");
        Ok(())
    }

    /// Replace a node's permission wholesale.
    ///
    /// When the node already shares a record with other nodes, the record
    /// is overwritten in place: every co-member sees the new value and the
    /// reference count is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn set_node_perm(
        &self,
        node_id: &NodeId,
        permission: Permission,
    ) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.set_node_perm_tx(&mut tx, node_id, permission).await
    }

    /// [`set_node_perm`](Self::set_node_perm) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] or [`AclError::Lock`].
    pub async fn set_node_perm_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
        permission: Permission,
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let vault_ids: Vec<VaultId> = permission.vaults.keys().cloned().collect();
        match staging.node_ref(node_id).await? {
            Some((perm_id, mut perm_ref)) => {
                perm_ref.object = permission;
                staging.set_perm(perm_id, perm_ref);
            }
            None => {
                if let Some(stale) = staging.node(node_id).await? {
                    staging.release(&stale).await?;
                }
                let perm_id = staging.create(1, permission);
                staging.set_node(node_id.clone(), Some(perm_id));
            }
        }
        for vault_id in &vault_ids {
            staging.index_nodes(vault_id, [node_id]).await?;
        }
        staging.commit().await?;
        debug!(node_id = %node_id, "node permission set");
        Ok(())
    }

    /// Detach the node from its permission. The record loses one reference
    /// and is deleted at zero. Vault reverse indices are left for the next
    /// read to prune.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn unset_node_perm(&self, node_id: &NodeId) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.unset_node_perm_tx(&mut tx, node_id).await
    }

    /// [`unset_node_perm`](Self::unset_node_perm) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] or [`AclError::Lock`].
    pub async fn unset_node_perm_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let Some(perm_id) = staging.node(node_id).await? else {
            return Ok(());
        };
        staging.release(&perm_id).await?;
        staging.set_node(node_id.clone(), None);
        staging.commit().await?;
        debug!(node_id = %node_id, "node permission unset");
        Ok(())
    }

    /// Strip `vault_id` from every indexed node's permission and drop the
    /// vault's reverse index.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn unset_vault_perms(&self, vault_id: &VaultId) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.unset_vault_perms_tx(&mut tx, vault_id).await
    }

    /// [`unset_vault_perms`](Self::unset_vault_perms) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] or [`AclError::Lock`].
    pub async fn unset_vault_perms_tx(
        &self,
        tx: &mut Transaction,
        vault_id: &VaultId,
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let Some(index) = staging.vault_index(vault_id).await? else {
            return Ok(());
        };
        for node_id in &index {
            let Some((perm_id, mut perm_ref)) = staging.node_ref(node_id).await? else {
                continue;
            };
            if perm_ref.object.vaults.remove(vault_id).is_some() {
                staging.set_perm(perm_id, perm_ref);
            }
        }
        staging.set_vault_index(vault_id.clone(), BTreeSet::new());
        staging.commit().await?;
        info!(vault_id = %vault_id, nodes = index.len(), "vault permissions removed");
        Ok(())
    }

    // ── Merging ──────────────────────────────────────────────────────

    /// Merge `join` into `node_id`'s gestalt permission.
    ///
    /// Each joining node is repointed at the target record (whose count
    /// grows by one) and releases its old record. Nodes already sharing the
    /// target are skipped, so repeating a join changes nothing. Joined nodes
    /// are added to the reverse index of every vault the target permission
    /// lists.
    ///
    /// # Errors
    ///
    /// - [`AclError::NodeIdMissing`] if `node_id` has no permission.
    /// - [`AclError::Db`] if the store fails.
    pub async fn join_node_perm(&self, node_id: &NodeId, join: &[NodeId]) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.join_node_perm_tx(&mut tx, node_id, join).await
    }

    /// [`join_node_perm`](Self::join_node_perm) inside `tx`.
    ///
    /// # Errors
    ///
    /// - [`AclError::NodeIdMissing`] if `node_id` has no permission.
    /// - [`AclError::Db`] or [`AclError::Lock`].
    pub async fn join_node_perm_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
        join: &[NodeId],
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let Some((target_id, mut target)) = staging.node_ref(node_id).await? else {
            return Err(AclError::NodeIdMissing {
                node_id: node_id.clone(),
            });
        };
        let mut joined = Vec::new();
        for other in join {
            let current = staging.node(other).await?;
            if current.as_ref() == Some(&target_id) {
                continue;
            }
            target.count += 1;
            if let Some(old) = current {
                staging.release(&old).await?;
            }
            staging.set_node(other.clone(), Some(target_id.clone()));
            joined.push(other.clone());
        }
        if joined.is_empty() {
            return Ok(());
        }
        let vault_ids: Vec<VaultId> = target.object.vaults.keys().cloned().collect();
        staging.set_perm(target_id.clone(), target);
        for vault_id in &vault_ids {
            staging.index_nodes(vault_id, &joined).await?;
        }
        staging.commit().await?;
        info!(node_id = %node_id, permission_id = %target_id, joined = joined.len(), "node permissions joined");
        Ok(())
    }

    /// Copy `vault_id`'s authorized nodes and their actions onto each vault
    /// in `join`. Actions and index entries are merged into whatever the
    /// target vaults already have; stale source entries are pruned first.
    ///
    /// # Errors
    ///
    /// - [`AclError::VaultIdMissing`] if the source vault has no index.
    /// - [`AclError::Db`] if the store fails.
    pub async fn join_vault_perms(
        &self,
        vault_id: &VaultId,
        join: &[VaultId],
    ) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        self.join_vault_perms_tx(&mut tx, vault_id, join).await
    }

    /// [`join_vault_perms`](Self::join_vault_perms) inside `tx`.
    ///
    /// # Errors
    ///
    /// - [`AclError::VaultIdMissing`] if the source vault has no index.
    /// - [`AclError::Db`] or [`AclError::Lock`].
    pub async fn join_vault_perms_tx(
        &self,
        tx: &mut Transaction,
        vault_id: &VaultId,
        join: &[VaultId],
    ) -> Result<(), AclError> {
        tx.acquire(&self.lock).await?;
        let mut staging = Staging::new(self);
        let Some((live, _pruned)) = staging.reconcile(vault_id).await? else {
            return Err(AclError::VaultIdMissing {
                vault_id: vault_id.clone(),
            });
        };
        for node_id in live.keys() {
            // Re-read through the arena: co-members share one record and an
            // earlier iteration may already have extended it.
            let Some((perm_id, mut perm_ref)) = staging.node_ref(node_id).await? else {
                continue;
            };
            let actions = perm_ref
                .object
                .vaults
                .get(vault_id)
                .cloned()
                .unwrap_or_default();
            for target in join {
                perm_ref
                    .object
                    .vaults
                    .entry(target.clone())
                    .or_default()
                    .extend(actions.iter().copied());
            }
            staging.set_perm(perm_id, perm_ref);
        }
        for target in join {
            staging.index_nodes(target, live.keys()).await?;
        }
        staging.commit().await?;
        info!(vault_id = %vault_id, targets = join.len(), "vault permissions joined");
        Ok(())
    }

    /// Remove every ACL record.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Db`] if the store fails.
    pub async fn clear(&self) -> Result<(), AclError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        self.db.clear(&self.root).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Acl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acl").finish_non_exhaustive()
    }
}
