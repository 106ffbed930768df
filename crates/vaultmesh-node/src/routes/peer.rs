//! Peer routes: `/v1/peer/*`
//!
//! Served to remote nodes. The requester comes from the `X-Node-Id` header
//! via [`peer_middleware`](crate::middleware::peer_middleware).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use vaultmesh_core::{VaultId, VaultSnapshot};

use crate::error::AppError;
use crate::middleware::PeerNode;
use crate::state::AppState;

/// Build the `/v1/peer` router.
///
/// Paths:
/// - `GET /v1/peer/vaults`: names of vaults the requester may pull
/// - `GET /v1/peer/vaults/{vault_id}`: vault content
/// - `GET /v1/peer/vaults/{vault_id}/permission`: whether the requester may pull
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vaults", get(scan_vaults))
        .route("/vaults/{vault_id}", get(fetch_vault))
        .route("/vaults/{vault_id}/permission", get(check_permission))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionCheckResponse {
    pub allowed: bool,
}

async fn scan_vaults(
    State(state): State<Arc<AppState>>,
    Extension(PeerNode(requester)): Extension<PeerNode>,
) -> Result<Json<ScanResponse>, AppError> {
    let names = state.vault_manager.scan_vaults_for(&requester).await?;
    Ok(Json(ScanResponse { names }))
}

async fn fetch_vault(
    State(state): State<Arc<AppState>>,
    Extension(PeerNode(requester)): Extension<PeerNode>,
    Path(vault_id): Path<String>,
) -> Result<Json<VaultSnapshot>, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    Ok(Json(
        state
            .vault_manager
            .fetch_vault_for(&requester, &vault_id)
            .await?,
    ))
}

async fn check_permission(
    State(state): State<Arc<AppState>>,
    Extension(PeerNode(requester)): Extension<PeerNode>,
    Path(vault_id): Path<String>,
) -> Result<Json<PermissionCheckResponse>, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let allowed = state
        .vault_manager
        .check_vault_permission(&requester, &vault_id)
        .await?;
    Ok(Json(PermissionCheckResponse { allowed }))
}
