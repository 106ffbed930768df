//! Peer identification middleware.
//!
//! Extracts the `X-Node-Id` header on peer routes and injects the parsed
//! [`PeerNode`] into the request extensions for downstream handlers.
//! Proving that the header is genuine belongs to the transport in front of
//! the node.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use vaultmesh_core::NodeId;

use crate::error::AppError;

/// Header carrying the requesting node's id.
pub const NODE_ID_HEADER: &str = "x-node-id";

/// The node a peer request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerNode(pub NodeId);

/// Middleware that requires and parses the `X-Node-Id` header.
///
/// # Errors
///
/// - [`AppError::Unauthorized`] if the header is missing.
/// - [`AppError::BadRequest`] if it is not a valid node id.
pub async fn peer_middleware(mut req: Request, next: Next) -> Result<Response, AppError> {
    let raw = req
        .headers()
        .get(NODE_ID_HEADER)
        .ok_or_else(|| AppError::Unauthorized("missing X-Node-Id header".to_owned()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("X-Node-Id header is not valid ASCII".to_owned()))?;
    let node_id: NodeId = raw.trim().parse()?;

    req.extensions_mut().insert(PeerNode(node_id));
    Ok(next.run(req).await)
}
