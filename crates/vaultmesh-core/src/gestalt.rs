//! Trust graph of nodes.
//!
//! A gestalt is a connected component of the graph: every node reachable
//! through links belongs to the same real-world actor and shares one ACL
//! permission. The graph keeps the ACL in step: linking merges permissions
//! with [`Acl::join_node_perm`], and a split hands the detached component a
//! private copy.
//!
//! Storage is an adjacency map under `gestalts/matrix/<node_id>` holding
//! the node's direct neighbours. A node is in the graph iff its key exists.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::acl::{Acl, GestaltAction, Permission};
use crate::db::{Batch, Db, Domain};
use crate::error::GestaltError;
use crate::ids::NodeId;
use crate::lock::{LockRank, Transaction, TransactionLock};

/// One connected set of nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gestalt {
    /// Member nodes.
    pub nodes: BTreeSet<NodeId>,
}

impl Gestalt {
    /// Whether `node_id` is a member.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains(node_id)
    }
}

/// The query side of the trust graph the vault manager consumes.
#[async_trait]
pub trait TrustGraph: Send + Sync {
    /// The lock guarding the graph, so callers can take it first in a
    /// composed transaction.
    fn lock(&self) -> &TransactionLock;

    /// The gestalt containing `node_id`, or `None` if the node is not in
    /// the graph.
    async fn get_gestalt_by_node_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
    ) -> Result<Option<Gestalt>, GestaltError>;

    /// [`get_gestalt_by_node_tx`](Self::get_gestalt_by_node_tx) in a fresh
    /// transaction.
    async fn get_gestalt_by_node(&self, node_id: &NodeId) -> Result<Option<Gestalt>, GestaltError> {
        let mut tx = Transaction::new();
        self.get_gestalt_by_node_tx(&mut tx, node_id).await
    }
}

type Matrix = BTreeMap<NodeId, BTreeSet<NodeId>>;

/// Durable trust graph over the node's database.
pub struct GestaltGraph {
    db: Db,
    acl: Arc<Acl>,
    lock: TransactionLock,
    root: Domain,
    matrix: Domain,
}

impl GestaltGraph {
    /// Create a graph that keeps `acl` in step with its gestalts.
    #[must_use]
    pub fn new(db: Db, acl: Arc<Acl>) -> Self {
        let root = Domain::new("gestalts");
        Self {
            db,
            acl,
            lock: TransactionLock::new(LockRank::Gestalt),
            matrix: root.level("matrix"),
            root,
        }
    }

    async fn neighbours(&self, node_id: &NodeId) -> Result<Option<BTreeSet<NodeId>>, GestaltError> {
        Ok(self.db.get(&self.matrix, node_id.as_str()).await?)
    }

    async fn load_matrix(&self) -> Result<Matrix, GestaltError> {
        Ok(self
            .db
            .entries::<BTreeSet<NodeId>>(&self.matrix)
            .await?
            .into_iter()
            .filter_map(|(k, v)| k.parse::<NodeId>().ok().map(|id| (id, v)))
            .collect())
    }

    /// Breadth-first walk from `start` over the stored adjacency.
    async fn component(&self, start: &NodeId) -> Result<Option<Gestalt>, GestaltError> {
        if self.neighbours(start).await?.is_none() {
            return Ok(None);
        }
        let mut seen = BTreeSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(node) = queue.pop_front() {
            for next in self.neighbours(&node).await?.unwrap_or_default() {
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        Ok(Some(Gestalt { nodes: seen }))
    }

    /// Give `members` a private copy of the permission they currently
    /// share with the rest of their old gestalt.
    async fn split_off(
        &self,
        tx: &mut Transaction,
        members: &BTreeSet<NodeId>,
    ) -> Result<(), GestaltError> {
        let Some(first) = members.first() else {
            return Ok(());
        };
        let permission = self
            .acl
            .get_node_permission_tx(tx, first)
            .await?
            .unwrap_or_default();
        for node_id in members {
            self.acl.unset_node_perm_tx(tx, node_id).await?;
        }
        let members: Vec<NodeId> = members.iter().cloned().collect();
        self.acl.set_nodes_perm_tx(tx, &members, permission).await?;
        debug!(nodes = members.len(), "gestalt split off");
        Ok(())
    }

    /// Add a node as a gestalt of its own. Existing nodes are left as they
    /// are. A new node gets an empty permission.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`] or [`GestaltError::Acl`].
    pub async fn set_node(&self, node_id: &NodeId) -> Result<(), GestaltError> {
        let mut tx = Transaction::new();
        self.set_node_tx(&mut tx, node_id).await
    }

    /// [`set_node`](Self::set_node) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`], [`GestaltError::Acl`] or
    /// [`GestaltError::Lock`].
    pub async fn set_node_tx(&self, tx: &mut Transaction, node_id: &NodeId) -> Result<(), GestaltError> {
        tx.acquire(&self.lock).await?;
        if self.neighbours(node_id).await?.is_none() {
            self.db
                .put(&self.matrix, node_id.as_str(), &BTreeSet::<NodeId>::new())
                .await?;
            info!(node_id = %node_id, "node added to trust graph");
        }
        if self.acl.get_node_permission_tx(tx, node_id).await?.is_none() {
            self.acl
                .set_node_perm_tx(tx, node_id, Permission::new())
                .await?;
        }
        Ok(())
    }

    /// Remove a node and its links. Its permission is released; former
    /// neighbours that are no longer connected to each other are split into
    /// separate gestalts.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`] or [`GestaltError::Acl`].
    pub async fn unset_node(&self, node_id: &NodeId) -> Result<(), GestaltError> {
        let mut tx = Transaction::new();
        self.unset_node_tx(&mut tx, node_id).await
    }

    /// [`unset_node`](Self::unset_node) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`], [`GestaltError::Acl`] or
    /// [`GestaltError::Lock`].
    pub async fn unset_node_tx(&self, tx: &mut Transaction, node_id: &NodeId) -> Result<(), GestaltError> {
        tx.acquire(&self.lock).await?;
        let Some(neighbours) = self.neighbours(node_id).await? else {
            return Ok(());
        };
        let mut batch = Batch::new();
        for other in &neighbours {
            let mut links = self.neighbours(other).await?.unwrap_or_default();
            links.remove(node_id);
            batch.put(&self.matrix, other.as_str(), &links)?;
        }
        batch.del(&self.matrix, node_id.as_str())?;
        self.db.batch(batch).await?;
        self.acl.unset_node_perm_tx(tx, node_id).await?;

        // The first surviving component keeps the shared record; every other
        // one gets its own copy.
        let mut placed: BTreeSet<NodeId> = BTreeSet::new();
        let mut first = true;
        for other in &neighbours {
            if placed.contains(other) {
                continue;
            }
            let Some(component) = self.component(other).await? else {
                continue;
            };
            placed.extend(component.nodes.iter().cloned());
            if first {
                first = false;
            } else {
                self.split_off(tx, &component.nodes).await?;
            }
        }
        info!(node_id = %node_id, "node removed from trust graph");
        Ok(())
    }

    /// Link two nodes, merging their gestalts and permissions. Missing
    /// nodes are added first. The merged permission is the union of both
    /// sides.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`] or [`GestaltError::Acl`].
    pub async fn link_nodes(&self, a: &NodeId, b: &NodeId) -> Result<(), GestaltError> {
        let mut tx = Transaction::new();
        self.link_nodes_tx(&mut tx, a, b).await
    }

    /// [`link_nodes`](Self::link_nodes) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`], [`GestaltError::Acl`] or
    /// [`GestaltError::Lock`].
    pub async fn link_nodes_tx(
        &self,
        tx: &mut Transaction,
        a: &NodeId,
        b: &NodeId,
    ) -> Result<(), GestaltError> {
        tx.acquire(&self.lock).await?;
        if a == b {
            return self.set_node_tx(tx, a).await;
        }
        let side_a = self.component(a).await?.unwrap_or_else(|| Gestalt {
            nodes: BTreeSet::from([a.clone()]),
        });
        let side_b = self.component(b).await?.unwrap_or_else(|| Gestalt {
            nodes: BTreeSet::from([b.clone()]),
        });

        let mut links_a = self.neighbours(a).await?.unwrap_or_default();
        let mut links_b = self.neighbours(b).await?.unwrap_or_default();
        links_a.insert(b.clone());
        links_b.insert(a.clone());
        let mut batch = Batch::new();
        batch.put(&self.matrix, a.as_str(), &links_a)?;
        batch.put(&self.matrix, b.as_str(), &links_b)?;
        self.db.batch(batch).await?;

        if side_a.contains(b) {
            return Ok(());
        }

        let perm_a = self.acl.get_node_permission_tx(tx, a).await?;
        let perm_b = self.acl.get_node_permission_tx(tx, b).await?;
        match (perm_a, perm_b) {
            (Some(pa), pb) => {
                let merged = merge(pa, pb.unwrap_or_default());
                self.acl.set_node_perm_tx(tx, a, merged).await?;
                let join: Vec<NodeId> = side_b.nodes.into_iter().collect();
                self.acl.join_node_perm_tx(tx, a, &join).await?;
            }
            (None, Some(_)) => {
                let join: Vec<NodeId> = side_a.nodes.into_iter().collect();
                self.acl.join_node_perm_tx(tx, b, &join).await?;
            }
            (None, None) => {
                let members: Vec<NodeId> = side_a.nodes.union(&side_b.nodes).cloned().collect();
                self.acl
                    .set_nodes_perm_tx(tx, &members, Permission::new())
                    .await?;
            }
        }
        info!(a = %a, b = %b, "gestalts linked");
        Ok(())
    }

    /// Remove the direct link between two nodes. If that disconnects them,
    /// `b`'s side becomes a separate gestalt with a copy of the permission.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`] or [`GestaltError::Acl`].
    pub async fn unlink_nodes(&self, a: &NodeId, b: &NodeId) -> Result<(), GestaltError> {
        let mut tx = Transaction::new();
        self.unlink_nodes_tx(&mut tx, a, b).await
    }

    /// [`unlink_nodes`](Self::unlink_nodes) inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`], [`GestaltError::Acl`] or
    /// [`GestaltError::Lock`].
    pub async fn unlink_nodes_tx(
        &self,
        tx: &mut Transaction,
        a: &NodeId,
        b: &NodeId,
    ) -> Result<(), GestaltError> {
        tx.acquire(&self.lock).await?;
        let (Some(mut links_a), Some(mut links_b)) =
            (self.neighbours(a).await?, self.neighbours(b).await?)
        else {
            return Ok(());
        };
        if !links_a.remove(b) {
            return Ok(());
        }
        links_b.remove(a);
        let mut batch = Batch::new();
        batch.put(&self.matrix, a.as_str(), &links_a)?;
        batch.put(&self.matrix, b.as_str(), &links_b)?;
        self.db.batch(batch).await?;

        if let Some(side_b) = self.component(b).await? {
            if !side_b.contains(a) {
                self.split_off(tx, &side_b.nodes).await?;
            }
        }
        info!(a = %a, b = %b, "gestalts unlinked");
        Ok(())
    }

    /// Every gestalt in the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`] if the store fails.
    pub async fn get_gestalts(&self) -> Result<Vec<Gestalt>, GestaltError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        let matrix = self.load_matrix().await?;
        let mut placed = BTreeSet::new();
        let mut out = Vec::new();
        for start in matrix.keys() {
            if placed.contains(start) {
                continue;
            }
            let mut nodes = BTreeSet::from([start.clone()]);
            let mut queue = VecDeque::from([start.clone()]);
            while let Some(node) = queue.pop_front() {
                for next in matrix.get(&node).into_iter().flatten() {
                    if nodes.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
            }
            placed.extend(nodes.iter().cloned());
            out.push(Gestalt { nodes });
        }
        Ok(out)
    }

    /// Grant a gestalt action to the node's whole gestalt.
    ///
    /// # Errors
    ///
    /// - [`GestaltError::NodeMissing`] if the node is not in the graph.
    /// - [`GestaltError::Acl`] if the ACL update fails.
    pub async fn set_gestalt_action(
        &self,
        node_id: &NodeId,
        action: GestaltAction,
    ) -> Result<(), GestaltError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        self.require_node(node_id).await?;
        self.acl.set_node_action_tx(&mut tx, node_id, action).await?;
        Ok(())
    }

    /// Revoke a gestalt action from the node's whole gestalt.
    ///
    /// # Errors
    ///
    /// - [`GestaltError::NodeMissing`] if the node is not in the graph.
    /// - [`GestaltError::Acl`] if the ACL update fails.
    pub async fn unset_gestalt_action(
        &self,
        node_id: &NodeId,
        action: GestaltAction,
    ) -> Result<(), GestaltError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        self.require_node(node_id).await?;
        self.acl
            .unset_node_action_tx(&mut tx, node_id, action)
            .await?;
        Ok(())
    }

    /// The gestalt actions the node's gestalt holds.
    ///
    /// # Errors
    ///
    /// - [`GestaltError::NodeMissing`] if the node is not in the graph.
    /// - [`GestaltError::Acl`] if the ACL read fails.
    pub async fn get_gestalt_actions(
        &self,
        node_id: &NodeId,
    ) -> Result<BTreeSet<GestaltAction>, GestaltError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        self.require_node(node_id).await?;
        Ok(self
            .acl
            .get_node_permission_tx(&mut tx, node_id)
            .await?
            .map(|p| p.gestalt)
            .unwrap_or_default())
    }

    /// Remove every node and link. The ACL is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`GestaltError::Db`] if the store fails.
    pub async fn clear(&self) -> Result<(), GestaltError> {
        let mut tx = Transaction::new();
        tx.acquire(&self.lock).await?;
        self.db.clear(&self.root).await?;
        Ok(())
    }

    async fn require_node(&self, node_id: &NodeId) -> Result<(), GestaltError> {
        if self.neighbours(node_id).await?.is_none() {
            return Err(GestaltError::NodeMissing {
                node_id: node_id.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TrustGraph for GestaltGraph {
    fn lock(&self) -> &TransactionLock {
        &self.lock
    }

    async fn get_gestalt_by_node_tx(
        &self,
        tx: &mut Transaction,
        node_id: &NodeId,
    ) -> Result<Option<Gestalt>, GestaltError> {
        tx.acquire(&self.lock).await?;
        self.component(node_id).await
    }
}

impl std::fmt::Debug for GestaltGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GestaltGraph").finish_non_exhaustive()
    }
}

fn merge(mut into: Permission, from: Permission) -> Permission {
    into.gestalt.extend(from.gestalt);
    for (vault_id, actions) in from.vaults {
        into.vaults.entry(vault_id).or_default().extend(actions);
    }
    into
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::acl::VaultAction;
    use crate::db::tests::memory_db;
    use crate::ids::VaultId;

    fn graph() -> (GestaltGraph, Arc<Acl>) {
        let db = memory_db();
        let acl = Arc::new(Acl::new(db.clone()));
        (GestaltGraph::new(db, Arc::clone(&acl)), acl)
    }

    #[tokio::test]
    async fn set_node_seeds_empty_permission() {
        let (graph, acl) = graph();
        let node = NodeId::generate();
        graph.set_node(&node).await.unwrap();

        assert_eq!(
            acl.get_node_permission(&node).await.unwrap(),
            Some(Permission::new())
        );
        let gestalt = graph.get_gestalt_by_node(&node).await.unwrap().unwrap();
        assert_eq!(gestalt.nodes, BTreeSet::from([node]));
    }

    #[tokio::test]
    async fn unknown_node_has_no_gestalt() {
        let (graph, _) = graph();
        assert!(graph
            .get_gestalt_by_node(&NodeId::generate())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn link_merges_gestalts_and_permissions() {
        let (graph, acl) = graph();
        let a = NodeId::generate();
        let b = NodeId::generate();
        let c = NodeId::generate();
        let vault = VaultId::generate();
        graph.set_node(&a).await.unwrap();
        graph.link_nodes(&b, &c).await.unwrap();
        acl.set_vault_action(&vault, &b, VaultAction::Pull)
            .await
            .unwrap();
        graph
            .set_gestalt_action(&a, GestaltAction::Notify)
            .await
            .unwrap();

        graph.link_nodes(&a, &b).await.unwrap();

        let gestalt = graph.get_gestalt_by_node(&c).await.unwrap().unwrap();
        assert_eq!(gestalt.nodes, BTreeSet::from([a.clone(), b, c.clone()]));
        assert!(acl.same_node_perm(&a, &c).await.unwrap());
        let perm = acl.get_node_permission(&c).await.unwrap().unwrap();
        assert!(perm.gestalt.contains(&GestaltAction::Notify));
        assert!(perm.allows(&vault, VaultAction::Pull));
        assert_eq!(acl.permission_refs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn linking_twice_changes_nothing() {
        let (graph, acl) = graph();
        let a = NodeId::generate();
        let b = NodeId::generate();
        graph.link_nodes(&a, &b).await.unwrap();
        let before = acl.node_permission_ids().await.unwrap();
        graph.link_nodes(&b, &a).await.unwrap();
        assert_eq!(acl.node_permission_ids().await.unwrap(), before);
        assert_eq!(graph.get_gestalts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unlink_splits_permission() {
        let (graph, acl) = graph();
        let a = NodeId::generate();
        let b = NodeId::generate();
        graph.link_nodes(&a, &b).await.unwrap();
        graph
            .set_gestalt_action(&a, GestaltAction::Scan)
            .await
            .unwrap();

        graph.unlink_nodes(&a, &b).await.unwrap();

        assert!(!acl.same_node_perm(&a, &b).await.unwrap());
        assert_eq!(graph.get_gestalts().await.unwrap().len(), 2);
        // Both sides keep what the gestalt had, independently.
        graph
            .unset_gestalt_action(&a, GestaltAction::Scan)
            .await
            .unwrap();
        assert!(graph.get_gestalt_actions(&a).await.unwrap().is_empty());
        assert_eq!(
            graph.get_gestalt_actions(&b).await.unwrap(),
            BTreeSet::from([GestaltAction::Scan])
        );
    }

    #[tokio::test]
    async fn unset_node_splits_former_neighbours() {
        let (graph, acl) = graph();
        let hub = NodeId::generate();
        let left = NodeId::generate();
        let right = NodeId::generate();
        graph.link_nodes(&hub, &left).await.unwrap();
        graph.link_nodes(&hub, &right).await.unwrap();

        graph.unset_node(&hub).await.unwrap();

        assert!(graph.get_gestalt_by_node(&hub).await.unwrap().is_none());
        assert_eq!(acl.get_node_permission(&hub).await.unwrap(), None);
        assert!(!acl.same_node_perm(&left, &right).await.unwrap());
        assert_eq!(graph.get_gestalts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn gestalt_actions_require_known_node() {
        let (graph, _) = graph();
        let err = graph
            .set_gestalt_action(&NodeId::generate(), GestaltAction::Notify)
            .await
            .unwrap_err();
        assert!(matches!(err, GestaltError::NodeMissing { .. }));
    }
}
