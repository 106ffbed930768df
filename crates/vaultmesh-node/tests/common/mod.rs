//! Helpers shared by the node integration tests.

#![allow(clippy::unwrap_used, dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use vaultmesh_core::NodeId;
use vaultmesh_node::config::NodeConfig;
use vaultmesh_node::keys;
use vaultmesh_node::middleware::NODE_ID_HEADER;
use vaultmesh_node::routes::build_router;
use vaultmesh_node::state::AppState;

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    _tmp: tempfile::TempDir,
}

/// A node over in-memory storage with the given peer address book.
pub async fn app_with_peers(peers: BTreeMap<NodeId, String>) -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = NodeConfig::from_lookup(|_| None);
    config.state_dir = tmp.path().to_path_buf();
    config.peers = peers;
    let identity = keys::load_or_create(tmp.path()).unwrap();
    let state = AppState::build(&config, identity).await.unwrap();
    TestApp {
        router: build_router(Arc::clone(&state)),
        state,
        _tmp: tmp,
    }
}

pub async fn app() -> TestApp {
    app_with_peers(BTreeMap::new()).await
}

impl TestApp {
    /// Send one request; returns the status and the JSON body. Empty bodies
    /// come back as `Null`, plain-text bodies as a string.
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        peer: Option<&NodeId>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(peer) = peer {
            builder = builder.header(NODE_ID_HEADER, peer.as_str());
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None, None).await
    }

    /// Create a vault and return its id.
    pub async fn create_vault(&self, name: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/v1/vaults",
                Some(serde_json::json!({ "name": name })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_owned()
    }
}
