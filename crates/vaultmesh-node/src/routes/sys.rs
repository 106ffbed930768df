//! System routes: `/v1/sys/*`
//!
//! Health plus the runtime peer address book. Peers listed in
//! `VAULTMESH_PEERS` are loaded at startup; these routes add or drop peers
//! without a restart.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaultmesh_core::NodeId;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/sys` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/peers", get(list_peers))
        .route("/peers/{node_id}", put(set_peer).delete(remove_peer))
}

// ── Request / Response types ─────────────────────────────────────────

/// Response body for `GET /v1/sys/health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub node_id: String,
    pub sealed: bool,
    pub version: String,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SetPeerRequest {
    /// Base URL of the peer, e.g. `http://10.0.0.2:7420`.
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: BTreeMap<NodeId, String>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        node_id: state.node_id.to_string(),
        sealed: !state.barrier.is_unsealed().await,
        version: env!("CARGO_PKG_VERSION").to_owned(),
        server_time: Utc::now(),
    })
}

async fn list_peers(State(state): State<Arc<AppState>>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: state.connections.peers().await,
    })
}

async fn set_peer(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(body): Json<SetPeerRequest>,
) -> Result<StatusCode, AppError> {
    let node_id: NodeId = node_id.parse()?;
    if !(body.url.starts_with("http://") || body.url.starts_with("https://")) {
        return Err(AppError::BadRequest(
            "peer url must start with http:// or https://".to_owned(),
        ));
    }
    tracing::info!(node_id = %node_id, url = %body.url, "peer address set");
    state.connections.insert(node_id, body.url).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_peer(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let node_id: NodeId = node_id.parse()?;
    if state.connections.remove(&node_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("no address for node {node_id}")))
    }
}
