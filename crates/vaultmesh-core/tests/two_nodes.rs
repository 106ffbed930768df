//! Cross-node scenarios: two in-process nodes wired through
//! `LocalNodeClient`.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::Arc;

use vaultmesh_core::{
    Acl, Barrier, Db, EncryptionKey, GestaltGraph, LocalNodeClient, NodeId, StaticNodeConnections,
    VaultAction, VaultError, VaultManager, VaultManagerConfig,
};
use vaultmesh_storage::MemoryBackend;

struct TestNode {
    id: NodeId,
    manager: Arc<VaultManager>,
    graph: Arc<GestaltGraph>,
    acl: Arc<Acl>,
    connections: Arc<StaticNodeConnections>,
    _tmp: tempfile::TempDir,
}

async fn node() -> TestNode {
    let tmp = tempfile::tempdir().unwrap();
    let barrier = Barrier::unsealed(Arc::new(MemoryBackend::new()), EncryptionKey::generate());
    let db = Db::new(Arc::new(barrier));
    let acl = Arc::new(Acl::new(db.clone()));
    let graph = Arc::new(GestaltGraph::new(db.clone(), Arc::clone(&acl)));
    let connections = Arc::new(StaticNodeConnections::new());
    let id = NodeId::generate();
    let manager = Arc::new(VaultManager::new(VaultManagerConfig {
        node_id: id.clone(),
        vaults_dir: tmp.path().join("vaults"),
        db,
        acl: Arc::clone(&acl),
        gestalt_graph: graph.clone(),
        connections: connections.clone(),
    }));
    manager.start().await.unwrap();
    TestNode {
        id,
        manager,
        graph,
        acl,
        connections,
        _tmp: tmp,
    }
}

/// `local` can reach `remote` by id.
async fn connect(local: &TestNode, remote: &TestNode) {
    local
        .connections
        .insert(
            remote.id.clone(),
            Arc::new(LocalNodeClient::new(Arc::clone(&remote.manager))),
        )
        .await;
}

#[tokio::test]
async fn grant_and_revoke_across_a_gestalt() {
    let owner = node().await;
    let a = NodeId::generate();
    let b = NodeId::generate();
    owner.graph.link_nodes(&a, &b).await.unwrap();
    let vault = owner.manager.create_vault("V").await.unwrap();

    owner.manager.set_vault_permissions(&a, vault.id()).await.unwrap();

    let perms = owner.manager.get_vault_permissions(vault.id(), None).await.unwrap();
    assert_eq!(perms.keys().cloned().collect::<BTreeSet<_>>(), BTreeSet::from([a.clone(), b.clone()]));
    assert!(perms.values().all(|actions| actions.contains(&VaultAction::Pull)));

    owner.manager.unset_vault_permissions(&a, vault.id()).await.unwrap();

    assert!(owner.manager.get_vault_permissions(vault.id(), None).await.unwrap().is_empty());
    for node in [&a, &b] {
        let perm = owner.acl.get_node_permission(node).await.unwrap().unwrap();
        assert!(!perm.vaults.contains_key(vault.id()));
    }
}

#[tokio::test]
async fn unauthorized_clone_is_refused_until_granted() {
    let remote = node().await;
    let local = node().await;
    connect(&local, &remote).await;

    let vault = remote.manager.create_vault("V").await.unwrap();
    vault.write_secret("db-password", b"hunter2").await.unwrap();
    let vault_id = vault.id().clone();

    let err = local.manager.clone_vault(&vault_id, &remote.id).await.unwrap_err();
    assert!(matches!(
        err,
        VaultError::GitPermissionDenied { ref node_id, vault_id: ref denied } if *node_id == remote.id && *denied == vault_id
    ));
    assert!(local.manager.list_vaults().await.unwrap().is_empty());

    remote.graph.set_node(&local.id).await.unwrap();
    remote.manager.set_vault_permissions(&local.id, &vault_id).await.unwrap();

    let cloned = local.manager.clone_vault(&vault_id, &remote.id).await.unwrap();
    assert_eq!(cloned.id(), &vault_id);
    assert_eq!(cloned.name().await, "V");
    assert_eq!(cloned.read_secret("db-password").await.unwrap(), b"hunter2");
    assert_eq!(local.manager.get_default_remote(&vault_id).await.unwrap(), Some(remote.id.clone()));

    // A second clone clashes with the local copy.
    assert!(matches!(
        local.manager.clone_vault(&vault_id, &remote.id).await,
        Err(VaultError::VaultDefined { .. })
    ));
}

#[tokio::test]
async fn pull_follows_the_default_remote() {
    let remote = node().await;
    let local = node().await;
    connect(&local, &remote).await;

    let vault = remote.manager.create_vault("shared").await.unwrap();
    vault.write_secret("a", b"1").await.unwrap();
    remote.graph.set_node(&local.id).await.unwrap();
    remote.manager.set_vault_permissions(&local.id, vault.id()).await.unwrap();
    let copy = local.manager.clone_vault(vault.id(), &remote.id).await.unwrap();

    vault.write_secret("a", b"2").await.unwrap();
    vault.write_secret("b", b"3").await.unwrap();
    local.manager.pull_vault(vault.id(), None).await.unwrap();

    assert_eq!(copy.read_secret("a").await.unwrap(), b"2");
    assert_eq!(copy.list_secrets().await.unwrap(), vec!["a".to_owned(), "b".to_owned()]);

    // Revoked access stops further pulls.
    remote.manager.unset_vault_permissions(&local.id, vault.id()).await.unwrap();
    assert!(matches!(
        local.manager.pull_vault(vault.id(), None).await,
        Err(VaultError::GitPermissionDenied { .. })
    ));
}

#[tokio::test]
async fn scan_lists_only_pullable_vaults() {
    let remote = node().await;
    let local = node().await;
    connect(&local, &remote).await;

    let open = remote.manager.create_vault("open").await.unwrap();
    remote.manager.create_vault("closed").await.unwrap();
    remote.graph.set_node(&local.id).await.unwrap();
    remote.manager.set_vault_permissions(&local.id, open.id()).await.unwrap();

    assert_eq!(local.manager.scan_vault_names(&remote.id).await.unwrap(), vec!["open".to_owned()]);
}

#[tokio::test]
async fn delete_vault_cascades_permissions() {
    let owner = node().await;
    let vault = owner.manager.create_vault("V").await.unwrap();
    let vault_id = vault.id().clone();
    let nodes: Vec<NodeId> = (0..3).map(|_| NodeId::generate()).collect();
    for node in &nodes {
        owner.graph.set_node(node).await.unwrap();
        owner.manager.set_vault_permissions(node, &vault_id).await.unwrap();
    }
    assert_eq!(owner.manager.get_vault_permissions(&vault_id, None).await.unwrap().len(), 3);

    assert!(owner.manager.delete_vault(&vault_id).await.unwrap());

    let report = owner.acl.get_vault_permissions(&vault_id).await.unwrap();
    assert!(report.granted.is_empty());
    for node in &nodes {
        let perm = owner.acl.get_node_permission(node).await.unwrap().unwrap();
        assert!(!perm.vaults.contains_key(&vault_id));
    }
}

#[tokio::test]
async fn linking_a_peer_into_a_granted_gestalt_extends_access() {
    let remote = node().await;
    let local = node().await;
    connect(&local, &remote).await;

    let other_device = NodeId::generate();
    let vault = remote.manager.create_vault("team").await.unwrap();
    remote.graph.set_node(&other_device).await.unwrap();
    remote.manager.set_vault_permissions(&other_device, vault.id()).await.unwrap();

    assert!(!remote.manager.check_vault_permission(&local.id, vault.id()).await.unwrap());
    remote.graph.link_nodes(&other_device, &local.id).await.unwrap();
    assert!(remote.manager.check_vault_permission(&local.id, vault.id()).await.unwrap());

    local.manager.clone_vault(vault.id(), &remote.id).await.unwrap();
}

#[tokio::test]
async fn merged_gestalt_admits_members_of_both_sides() {
    let remote = node().await;
    let local = node().await;
    connect(&local, &remote).await;

    let vault = remote.manager.create_vault("ops").await.unwrap();
    vault.write_secret("token", b"t0").await.unwrap();

    // `local` joins a gestalt with no grants; the other side holds the grant.
    let anchor = NodeId::generate();
    remote.graph.link_nodes(&anchor, &local.id).await.unwrap();
    let b1 = NodeId::generate();
    let b2 = NodeId::generate();
    remote.graph.link_nodes(&b1, &b2).await.unwrap();
    remote.manager.set_vault_permissions(&b1, vault.id()).await.unwrap();
    assert!(!remote.manager.check_vault_permission(&local.id, vault.id()).await.unwrap());

    remote.graph.link_nodes(&anchor, &b1).await.unwrap();

    for member in [&anchor, &local.id, &b1, &b2] {
        assert!(
            remote.manager.check_vault_permission(member, vault.id()).await.unwrap(),
            "{member} should be able to pull"
        );
    }
    assert_eq!(local.manager.scan_vault_names(&remote.id).await.unwrap(), vec!["ops".to_owned()]);
    let cloned = local.manager.clone_vault(vault.id(), &remote.id).await.unwrap();
    assert_eq!(cloned.read_secret("token").await.unwrap(), b"t0");
}
