//! HTTP error types for the `VaultMesh` node.
//!
//! Maps domain errors from `vaultmesh-core` into appropriate HTTP responses.
//! Every error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use vaultmesh_core::{AclError, BarrierError, DbError, GestaltError, IdError, TransportError, VaultError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The barrier is sealed, nothing can be read or written.
    Sealed,
    /// The peer did not identify itself.
    Unauthorized(String),
    /// The requester lacks the needed permission.
    Forbidden(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// The resource already exists.
    Conflict(String),
    /// A remote node failed or could not be reached.
    BadGateway(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Sealed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "sealed",
                "node storage is sealed".to_owned(),
            ),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "remote_error", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<IdError> for AppError {
    fn from(err: IdError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Barrier(BarrierError::Sealed) => Self::Sealed,
            DbError::InvalidSegment { .. } => Self::BadRequest(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<AclError> for AppError {
    fn from(err: AclError) -> Self {
        match err {
            AclError::NodeIdMissing { .. } | AclError::VaultIdMissing { .. } => {
                Self::NotFound(err.to_string())
            }
            AclError::NodeIdExists { .. } => Self::Conflict(err.to_string()),
            AclError::Db(inner) => inner.into(),
            AclError::Lock(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<GestaltError> for AppError {
    fn from(err: GestaltError) -> Self {
        match err {
            GestaltError::NodeMissing { .. } => Self::NotFound(err.to_string()),
            GestaltError::Acl(inner) => inner.into(),
            GestaltError::Db(inner) => inner.into(),
            GestaltError::Lock(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PermissionDenied { .. } => Self::Forbidden(err.to_string()),
            TransportError::VaultNotFound { .. } => Self::NotFound(err.to_string()),
            TransportError::Unreachable { .. } | TransportError::Protocol { .. } => {
                Self::BadGateway(err.to_string())
            }
        }
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::VaultUndefined { .. }
            | VaultError::GestaltNodeIdMissing { .. }
            | VaultError::SecretNotFound { .. } => Self::NotFound(err.to_string()),

            VaultError::VaultDefined { .. } => Self::Conflict(err.to_string()),

            VaultError::GitPermissionDenied { .. } => Self::Forbidden(err.to_string()),

            VaultError::InvalidName { .. }
            | VaultError::NoDefaultRemote { .. }
            | VaultError::NodeConnectionNotExist { .. } => Self::BadRequest(err.to_string()),

            VaultError::Transport(inner) => inner.into(),
            VaultError::Acl(inner) => inner.into(),
            VaultError::Gestalt(inner) => inner.into(),
            VaultError::Db(inner) => inner.into(),

            VaultError::CreateVaultId { .. }
            | VaultError::VaultStopped { .. }
            | VaultError::Io { .. }
            | VaultError::Crypto(_)
            | VaultError::Lock(_) => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vaultmesh_core::{NodeId, VaultId};

    use super::*;

    fn status(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn taxonomy_maps_to_statuses() {
        let vault_id = VaultId::generate();
        let node_id = NodeId::generate();
        assert_eq!(
            status(VaultError::VaultUndefined { vault_id: vault_id.clone() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(VaultError::VaultDefined { name: "V".to_owned() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(VaultError::GitPermissionDenied {
                node_id: node_id.clone(),
                vault_id: vault_id.clone(),
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(VaultError::Transport(TransportError::Unreachable {
                node_id: node_id.clone(),
                reason: "connection refused".to_owned(),
            })),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(AclError::NodeIdExists { node_id }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(VaultError::CreateVaultId { attempts: 50 }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn sealed_barrier_surfaces_through_nested_errors() {
        let err = VaultError::Acl(AclError::Db(DbError::Barrier(BarrierError::Sealed)));
        assert_eq!(status(err), StatusCode::SERVICE_UNAVAILABLE);
    }
}
