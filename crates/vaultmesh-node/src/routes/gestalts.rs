//! Trust graph routes: `/v1/gestalts/*`
//!
//! Nodes, links between nodes, and the gestalt actions shared by every
//! member of a gestalt. Every change here keeps the ACL in step.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use vaultmesh_core::{Gestalt, GestaltAction, NodeId, Permission, TrustGraph};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/gestalts` router.
///
/// Paths:
/// - `GET    /v1/gestalts`: every gestalt
/// - `GET    /v1/gestalts/permissions`: permission groups from the ACL
/// - `GET|PUT|DELETE /v1/gestalts/nodes/{node_id}`: one node
/// - `GET    /v1/gestalts/nodes/{node_id}/permission`: the node's permission
/// - `PUT|DELETE /v1/gestalts/links/{a}/{b}`: link or unlink two nodes
/// - `GET    /v1/gestalts/nodes/{node_id}/actions`: gestalt actions
/// - `PUT|DELETE /v1/gestalts/nodes/{node_id}/actions/{action}`
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_gestalts))
        .route("/permissions", get(permission_groups))
        .route(
            "/nodes/{node_id}",
            get(get_gestalt).put(set_node).delete(unset_node),
        )
        .route("/nodes/{node_id}/permission", get(node_permission))
        .route("/nodes/{node_id}/actions", get(get_actions))
        .route(
            "/nodes/{node_id}/actions/{action}",
            put(set_action).delete(unset_action),
        )
        .route("/links/{a}/{b}", put(link_nodes).delete(unlink_nodes))
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct GestaltListResponse {
    pub gestalts: Vec<Gestalt>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionGroupsResponse {
    /// One map per shared permission record.
    pub groups: Vec<BTreeMap<NodeId, Permission>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionsResponse {
    pub actions: BTreeSet<GestaltAction>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_gestalts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GestaltListResponse>, AppError> {
    let gestalts = state.gestalt_graph.get_gestalts().await?;
    Ok(Json(GestaltListResponse { gestalts }))
}

async fn permission_groups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PermissionGroupsResponse>, AppError> {
    let groups = state.acl.get_node_perms().await?;
    Ok(Json(PermissionGroupsResponse { groups }))
}

async fn get_gestalt(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<Gestalt>, AppError> {
    let node_id: NodeId = node_id.parse()?;
    state
        .gestalt_graph
        .get_gestalt_by_node(&node_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("node {node_id} is not in the trust graph")))
}

async fn set_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let node_id: NodeId = node_id.parse()?;
    state.gestalt_graph.set_node(&node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unset_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let node_id: NodeId = node_id.parse()?;
    state.gestalt_graph.unset_node(&node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn node_permission(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<Permission>, AppError> {
    let node_id: NodeId = node_id.parse()?;
    state
        .acl
        .get_node_permission(&node_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("node {node_id} has no permission")))
}

async fn link_nodes(
    State(state): State<Arc<AppState>>,
    Path((a, b)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let a: NodeId = a.parse()?;
    let b: NodeId = b.parse()?;
    if a == b {
        return Err(AppError::BadRequest("cannot link a node to itself".to_owned()));
    }
    state.gestalt_graph.link_nodes(&a, &b).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlink_nodes(
    State(state): State<Arc<AppState>>,
    Path((a, b)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let a: NodeId = a.parse()?;
    let b: NodeId = b.parse()?;
    state.gestalt_graph.unlink_nodes(&a, &b).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_actions(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<ActionsResponse>, AppError> {
    let node_id: NodeId = node_id.parse()?;
    let actions = state.gestalt_graph.get_gestalt_actions(&node_id).await?;
    Ok(Json(ActionsResponse { actions }))
}

async fn set_action(
    State(state): State<Arc<AppState>>,
    Path((node_id, action)): Path<(String, GestaltAction)>,
) -> Result<StatusCode, AppError> {
    let node_id: NodeId = node_id.parse()?;
    state
        .gestalt_graph
        .set_gestalt_action(&node_id, action)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unset_action(
    State(state): State<Arc<AppState>>,
    Path((node_id, action)): Path<(String, GestaltAction)>,
) -> Result<StatusCode, AppError> {
    let node_id: NodeId = node_id.parse()?;
    state
        .gestalt_graph
        .unset_gestalt_action(&node_id, action)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
