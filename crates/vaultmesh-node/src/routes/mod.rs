//! HTTP route handlers for the `VaultMesh` node.
//!
//! Routes are organized by subsystem:
//! - `sys`: health
//! - `vaults`: local vault registry, secrets, permissions, clone/pull/scan
//! - `gestalts`: trust graph nodes, links and gestalt actions
//! - `peer`: requests from remote nodes, identified by `X-Node-Id`

use std::sync::Arc;

use axum::Router;
use axum::middleware as axum_mw;
use tower_http::trace::TraceLayer;

use crate::middleware::peer_middleware;
use crate::state::AppState;

pub mod gestalts;
pub mod peer;
pub mod sys;
pub mod vaults;

/// Peer requests served at once; each fetch reads a whole vault.
const PEER_CONCURRENCY: usize = 16;

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let peer_routes = Router::new()
        .nest("/v1/peer", peer::router())
        .route_layer(axum_mw::from_fn(peer_middleware))
        .layer(tower::limit::ConcurrencyLimitLayer::new(PEER_CONCURRENCY));

    Router::new()
        .nest("/v1/sys", sys::router())
        .nest("/v1/vaults", vaults::router())
        .nest("/v1/gestalts", gestalts::router())
        .merge(peer_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
