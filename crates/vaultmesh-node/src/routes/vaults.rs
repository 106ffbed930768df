//! Vault routes: `/v1/vaults/*`
//!
//! Local administration of the vault registry: create, list, rename and
//! delete vaults, read and write their secrets, share them with gestalts,
//! and clone, pull or scan vaults held by remote nodes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use vaultmesh_core::{NodeId, VaultAction, VaultEntry, VaultId, VaultStats};

use super::peer::ScanResponse;
use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/vaults` router.
///
/// Paths:
/// - `GET    /v1/vaults`: list
/// - `POST   /v1/vaults`: create
/// - `POST   /v1/vaults/clone`: clone from a remote node
/// - `GET    /v1/vaults/scan/{node_id}`: names a remote node lets us pull
/// - `GET    /v1/vaults/{vault_id}`: stats
/// - `DELETE /v1/vaults/{vault_id}`: delete
/// - `POST   /v1/vaults/{vault_id}/rename`: rename
/// - `POST   /v1/vaults/{vault_id}/pull`: pull from a remote node
/// - `GET    /v1/vaults/{vault_id}/permissions`: who may pull
/// - `PUT    /v1/vaults/{vault_id}/permissions/{node_id}`: share with a gestalt
/// - `DELETE /v1/vaults/{vault_id}/permissions/{node_id}`: stop sharing
/// - `GET    /v1/vaults/{vault_id}/secrets`: list secret names
/// - `GET|PUT|DELETE /v1/vaults/{vault_id}/secrets/{name}`: one secret
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_vaults).post(create_vault))
        .route("/clone", post(clone_vault))
        .route("/scan/{node_id}", get(scan_vaults))
        .route("/{vault_id}", get(vault_stats).delete(delete_vault))
        .route("/{vault_id}/rename", post(rename_vault))
        .route("/{vault_id}/pull", post(pull_vault))
        .route("/{vault_id}/permissions", get(get_permissions))
        .route(
            "/{vault_id}/permissions/{node_id}",
            put(set_permissions).delete(unset_permissions),
        )
        .route("/{vault_id}/secrets", get(list_secrets))
        .route(
            "/{vault_id}/secrets/{name}",
            get(read_secret).put(write_secret).delete(delete_secret),
        )
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateVaultRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameVaultRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CloneVaultRequest {
    pub vault_id: String,
    pub remote: String,
}

/// Request body for `POST /v1/vaults/{vault_id}/pull`. Without `remote` the
/// vault's default remote is used.
#[derive(Debug, Deserialize)]
pub struct PullVaultRequest {
    pub remote: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionsQuery {
    pub node_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WriteSecretRequest {
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VaultListResponse {
    pub vaults: Vec<VaultEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteVaultResponse {
    /// `false` when the directory could not be fully removed; the
    /// registry entry is gone either way.
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionsResponse {
    pub permissions: BTreeMap<NodeId, BTreeSet<VaultAction>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecretListResponse {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecretResponse {
    pub name: String,
    pub value: String,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_vaults(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VaultListResponse>, AppError> {
    let vaults = state.vault_manager.list_vaults().await?;
    Ok(Json(VaultListResponse { vaults }))
}

async fn create_vault(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateVaultRequest>,
) -> Result<(StatusCode, Json<VaultEntry>), AppError> {
    let vault = state.vault_manager.create_vault(&body.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(VaultEntry {
            name: vault.name().await,
            id: vault.id().clone(),
        }),
    ))
}

async fn vault_stats(
    State(state): State<Arc<AppState>>,
    Path(vault_id): Path<String>,
) -> Result<Json<VaultStats>, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    Ok(Json(state.vault_manager.get_vault_stats(&vault_id).await?))
}

async fn delete_vault(
    State(state): State<Arc<AppState>>,
    Path(vault_id): Path<String>,
) -> Result<Json<DeleteVaultResponse>, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let deleted = state.vault_manager.delete_vault(&vault_id).await?;
    Ok(Json(DeleteVaultResponse { deleted }))
}

async fn rename_vault(
    State(state): State<Arc<AppState>>,
    Path(vault_id): Path<String>,
    Json(body): Json<RenameVaultRequest>,
) -> Result<StatusCode, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    state.vault_manager.rename_vault(&vault_id, &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clone_vault(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CloneVaultRequest>,
) -> Result<(StatusCode, Json<VaultEntry>), AppError> {
    let vault_id: VaultId = body.vault_id.parse()?;
    let remote: NodeId = body.remote.parse()?;
    let vault = state.vault_manager.clone_vault(&vault_id, &remote).await?;
    Ok((
        StatusCode::CREATED,
        Json(VaultEntry {
            name: vault.name().await,
            id: vault.id().clone(),
        }),
    ))
}

async fn pull_vault(
    State(state): State<Arc<AppState>>,
    Path(vault_id): Path<String>,
    body: Option<Json<PullVaultRequest>>,
) -> Result<StatusCode, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let remote = body
        .and_then(|Json(body)| body.remote)
        .map(|r| r.parse::<NodeId>())
        .transpose()?;
    state
        .vault_manager
        .pull_vault(&vault_id, remote.as_ref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn scan_vaults(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<ScanResponse>, AppError> {
    let node_id: NodeId = node_id.parse()?;
    let names = state.vault_manager.scan_vault_names(&node_id).await?;
    Ok(Json(ScanResponse { names }))
}

async fn get_permissions(
    State(state): State<Arc<AppState>>,
    Path(vault_id): Path<String>,
    Query(query): Query<PermissionsQuery>,
) -> Result<Json<PermissionsResponse>, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let node_id = query.node_id.map(|n| n.parse::<NodeId>()).transpose()?;
    let permissions = state
        .vault_manager
        .get_vault_permissions(&vault_id, node_id.as_ref())
        .await?;
    Ok(Json(PermissionsResponse { permissions }))
}

async fn set_permissions(
    State(state): State<Arc<AppState>>,
    Path((vault_id, node_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let node_id: NodeId = node_id.parse()?;
    state
        .vault_manager
        .set_vault_permissions(&node_id, &vault_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unset_permissions(
    State(state): State<Arc<AppState>>,
    Path((vault_id, node_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let node_id: NodeId = node_id.parse()?;
    state
        .vault_manager
        .unset_vault_permissions(&node_id, &vault_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_secrets(
    State(state): State<Arc<AppState>>,
    Path(vault_id): Path<String>,
) -> Result<Json<SecretListResponse>, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let vault = state.vault_manager.get_vault(&vault_id).await?;
    Ok(Json(SecretListResponse {
        names: vault.list_secrets().await?,
    }))
}

async fn read_secret(
    State(state): State<Arc<AppState>>,
    Path((vault_id, name)): Path<(String, String)>,
) -> Result<Json<SecretResponse>, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let vault = state.vault_manager.get_vault(&vault_id).await?;
    let bytes = vault.read_secret(&name).await?;
    let value = String::from_utf8(bytes)
        .map_err(|_| AppError::Internal(format!("secret '{name}' is not valid UTF-8")))?;
    Ok(Json(SecretResponse { name, value }))
}

async fn write_secret(
    State(state): State<Arc<AppState>>,
    Path((vault_id, name)): Path<(String, String)>,
    Json(body): Json<WriteSecretRequest>,
) -> Result<StatusCode, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let vault = state.vault_manager.get_vault(&vault_id).await?;
    vault.write_secret(&name, body.value.as_bytes()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Path((vault_id, name)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let vault_id: VaultId = vault_id.parse()?;
    let vault = state.vault_manager.get_vault(&vault_id).await?;
    vault.delete_secret(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
