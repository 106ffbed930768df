//! Router tests driven through `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used)]

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use vaultmesh_core::NodeId;

use common::app;

#[tokio::test]
async fn health_reports_the_node() {
    let app = app().await;
    let (status, body) = app.get("/v1/sys/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node_id"], app.state.node_id.to_string());
    assert_eq!(body["sealed"], false);
}

#[tokio::test]
async fn vault_lifecycle_over_http() {
    let app = app().await;
    let id = app.create_vault("team").await;

    let (status, body) = app.get("/v1/vaults").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vaults"], json!([{ "name": "team", "id": id }]));

    // Names are unique.
    let (status, body) = app
        .call(Method::POST, "/v1/vaults", Some(json!({ "name": "team" })), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/v1/vaults/{id}/rename"),
            Some(json!({ "name": "ops" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.get(&format!("/v1/vaults/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "ops");
    assert_eq!(body["secret_count"], 0);

    let (status, body) = app
        .call(Method::DELETE, &format!("/v1/vaults/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, body) = app.get(&format!("/v1/vaults/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn secrets_round_trip() {
    let app = app().await;
    let id = app.create_vault("V").await;
    let secret = format!("/v1/vaults/{id}/secrets/db-password");

    let (status, _) = app
        .call(Method::PUT, &secret, Some(json!({ "value": "hunter2" })), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.get(&secret).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "name": "db-password", "value": "hunter2" }));

    let (_, body) = app.get(&format!("/v1/vaults/{id}/secrets")).await;
    assert_eq!(body["names"], json!(["db-password"]));

    let (status, _) = app.call(Method::DELETE, &secret, None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&secret).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let app = app().await;
    let (status, body) = app.get("/v1/vaults/not-base58-0OIl").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, _) = app
        .call(Method::PUT, "/v1/gestalts/nodes/0OIl", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sharing_follows_the_gestalt() {
    let app = app().await;
    let id = app.create_vault("V").await;
    let a = NodeId::generate();
    let b = NodeId::generate();

    // Not in the trust graph yet.
    let (status, _) = app
        .call(Method::PUT, &format!("/v1/vaults/{id}/permissions/{a}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(Method::PUT, &format!("/v1/gestalts/links/{a}/{b}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .call(Method::PUT, &format!("/v1/vaults/{id}/permissions/{a}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = app.get(&format!("/v1/vaults/{id}/permissions")).await;
    let permissions = body["permissions"].as_object().unwrap();
    assert_eq!(permissions.len(), 2);
    assert_eq!(permissions[b.as_str()], json!(["pull"]));

    let (_, body) = app
        .get(&format!("/v1/vaults/{id}/permissions?node_id={b}"))
        .await;
    assert_eq!(body["permissions"].as_object().unwrap().len(), 1);

    let (_, body) = app.get("/v1/gestalts/permissions").await;
    assert_eq!(body["groups"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .call(Method::DELETE, &format!("/v1/vaults/{id}/permissions/{b}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = app.get(&format!("/v1/vaults/{id}/permissions")).await;
    assert!(body["permissions"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn gestalt_actions_and_links() {
    let app = app().await;
    let a = NodeId::generate();
    let b = NodeId::generate();

    let (status, _) = app.get(&format!("/v1/gestalts/nodes/{a}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.call(Method::PUT, &format!("/v1/gestalts/links/{a}/{b}"), None, None)
        .await;
    let (status, body) = app.get(&format!("/v1/gestalts/nodes/{a}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);

    let (status, _) = app
        .call(Method::PUT, &format!("/v1/gestalts/nodes/{a}/actions/notify"), None, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = app.get(&format!("/v1/gestalts/nodes/{b}/actions")).await;
    assert_eq!(body["actions"], json!(["notify"]));

    let (status, _) = app
        .call(Method::PUT, &format!("/v1/gestalts/nodes/{a}/actions/fly"), None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(Method::PUT, &format!("/v1/gestalts/links/{a}/{a}"), None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.call(Method::DELETE, &format!("/v1/gestalts/links/{a}/{b}"), None, None)
        .await;
    let (_, body) = app.get("/v1/gestalts").await;
    assert_eq!(body["gestalts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn peer_routes_require_a_node_id() {
    let app = app().await;
    let (status, body) = app.get("/v1/peer/vaults").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn peer_fetch_is_gated_by_pull() {
    let app = app().await;
    let id = app.create_vault("shared").await;
    app.call(
        Method::PUT,
        &format!("/v1/vaults/{id}/secrets/token"),
        Some(json!({ "value": "abc" })),
        None,
    )
    .await;
    let peer = NodeId::generate();
    let fetch = format!("/v1/peer/vaults/{id}");

    let (status, _) = app.call(Method::GET, &fetch, None, Some(&peer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, body) = app
        .call(Method::GET, &format!("{fetch}/permission"), None, Some(&peer))
        .await;
    assert_eq!(body["allowed"], false);

    app.call(Method::PUT, &format!("/v1/gestalts/nodes/{peer}"), None, None)
        .await;
    app.call(Method::PUT, &format!("/v1/vaults/{id}/permissions/{peer}"), None, None)
        .await;

    let (status, body) = app.call(Method::GET, &fetch, None, Some(&peer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vault_id"], id);
    assert_eq!(body["name"], "shared");
    assert_eq!(body["secrets"]["token"], hex_of("abc"));

    let (_, body) = app
        .call(Method::GET, "/v1/peer/vaults", None, Some(&peer))
        .await;
    assert_eq!(body["names"], json!(["shared"]));
}

#[tokio::test]
async fn clone_from_an_unknown_peer_is_rejected() {
    let app = app().await;
    let remote = NodeId::generate();
    let vault_id = NodeId::generate();
    let (status, body) = app
        .call(
            Method::POST,
            "/v1/vaults/clone",
            Some(json!({ "vault_id": vault_id.as_str(), "remote": remote.as_str() })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains(remote.as_str()));
}

#[tokio::test]
async fn peer_address_book_edits() {
    let app = app().await;
    let peer = NodeId::generate();
    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/v1/sys/peers/{peer}"),
            Some(json!({ "url": "http://10.0.0.9:7420" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = app.get("/v1/sys/peers").await;
    assert_eq!(body["peers"][peer.as_str()], "http://10.0.0.9:7420");

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/v1/sys/peers/{peer}"),
            Some(json!({ "url": "ftp://nope" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(Method::DELETE, &format!("/v1/sys/peers/{peer}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .call(Method::DELETE, &format!("/v1/sys/peers/{peer}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn hex_of(value: &str) -> String {
    value.bytes().map(|b| format!("{b:02x}")).collect()
}
