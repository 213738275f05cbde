//! Integration tests for skein-server
//!
//! Drive the axum router in-process: health, JSON-RPC over POST /mcp and the
//! plugin lifecycle endpoints.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use skein_server::{
    config::ServerConfig,
    plugins::bundled_loader,
    server::{create_router, ServerState},
};

async fn create_test_state() -> (ServerState, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.mcp.builtins.root = dir.path().to_path_buf();
    let state = ServerState::build(config, Arc::new(bundled_loader())).await.unwrap();
    (state, dir)
}

async fn send_request(router: axum::Router, method: Method, uri: &str, body: Option<String>) -> Response {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    router.oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn rpc(router: axum::Router, message: Value) -> Value {
    let response = send_request(router, Method::POST, "/mcp", Some(message.to_string())).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn test_health_endpoint() {
    let (state, _dir) = create_test_state().await;
    let router = create_router(state);

    let response = send_request(router, Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "skein-server");
    assert_eq!(json["plugins_active"], 2);
}

#[tokio::test]
async fn test_single_request_over_post() {
    let (state, _dir) = create_test_state().await;
    let router = create_router(state);

    let reply = rpc(
        router,
        json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call",
               "params": {"name": "echo", "arguments": {"message": "hi"}}}),
    )
    .await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["content"][0]["text"], "Echo: hi");
}

#[tokio::test]
async fn test_batch_over_post_keeps_order() {
    let (state, _dir) = create_test_state().await;
    let router = create_router(state);

    let reply = rpc(
        router,
        json!([
            {"jsonrpc": "2.0", "id": "a", "method": "ping"},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": "b", "method": "does/not/exist"}
        ]),
    )
    .await;
    let replies = reply.as_array().unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], "a");
    assert_eq!(replies[1]["id"], "b");
    assert_eq!(replies[1]["error"]["code"], -32601);
}

#[tokio::test]
async fn test_notification_gets_no_content() {
    let (state, _dir) = create_test_state().await;
    let router = create_router(state);

    let body = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
    let response = send_request(router, Method::POST, "/mcp", Some(body)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let (state, _dir) = create_test_state().await;
    let router = create_router(state);

    let response = send_request(router, Method::POST, "/mcp", Some("{not json".to_string())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());
}

#[tokio::test]
async fn test_bundled_plugins_reachable_over_mcp() {
    let (state, _dir) = create_test_state().await;
    let router = create_router(state);

    let tools = rpc(router.clone(), json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"current_time"));
    assert!(names.contains(&"note_add"));

    let added = rpc(
        router.clone(),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
               "params": {"name": "note_add", "arguments": {"title": "milk"}}}),
    )
    .await;
    assert_eq!(added["result"]["content"][0]["text"], "Added note 1");

    let read = rpc(
        router,
        json!({"jsonrpc": "2.0", "id": 3, "method": "resources/read", "params": {"uri": "notes://all"}}),
    )
    .await;
    let text = read["result"]["contents"][0]["text"].as_str().unwrap();
    let notes: Value = serde_json::from_str(text).unwrap();
    assert_eq!(notes[0]["title"], "milk");
}

#[tokio::test]
async fn test_plugin_disable_and_enable() {
    let (state, _dir) = create_test_state().await;
    let router = create_router(state);

    let response = send_request(router.clone(), Method::POST, "/plugins/clock/disable", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["enabled"], false);

    let call = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                      "params": {"name": "current_time", "arguments": {}}});
    let reply = rpc(router.clone(), call.clone()).await;
    assert_eq!(reply["error"]["code"], -32001);

    let response = send_request(router.clone(), Method::POST, "/plugins/clock/enable", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "active");

    let reply = rpc(router, call).await;
    assert!(reply["result"]["content"][0]["text"].is_string());
}

#[tokio::test]
async fn test_plugin_listing_and_lookup() {
    let (state, _dir) = create_test_state().await;
    let router = create_router(state);

    let response = send_request(router.clone(), Method::GET, "/plugins", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 2);

    let response = send_request(router.clone(), Method::GET, "/plugins/notes", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["tools"], json!(["note_add", "note_list"]));

    let response = send_request(router.clone(), Method::POST, "/plugins/notes/reload", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send_request(router, Method::GET, "/plugins/missing", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "plugin_not_found");
}
