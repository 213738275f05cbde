//! WebSocket front-end against a real listener

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use skein_server::{
    config::ServerConfig,
    plugins::bundled_loader,
    server::{create_router, ServerState},
};

async fn spawn_server() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.mcp.builtins.root = dir.path().to_path_buf();
    let state = ServerState::build(config, Arc::new(bundled_loader())).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    (format!("ws://{}/ws", addr), dir)
}

async fn next_json<S>(stream: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_request_and_batch_over_websocket() {
    let (url, _dir) = spawn_server().await;
    let (socket, _) = connect_async(url).await.unwrap();
    let (mut sink, mut stream) = socket.split();

    let call = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                      "params": {"name": "echo", "arguments": {"message": "over ws"}}});
    sink.send(Message::Text(call.to_string())).await.unwrap();
    let reply = next_json(&mut stream).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["content"][0]["text"], "Echo: over ws");

    let batch = json!([
        {"jsonrpc": "2.0", "id": "x", "method": "ping"},
        {"jsonrpc": "2.0", "id": "y", "method": "resources/read", "params": {"uri": "nowhere://"}}
    ]);
    sink.send(Message::Text(batch.to_string())).await.unwrap();
    let replies = next_json(&mut stream).await;
    assert_eq!(replies[0]["id"], "x");
    assert_eq!(replies[1]["error"]["code"], -32002);
}

#[tokio::test]
async fn test_binary_frame_rejected() {
    let (url, _dir) = spawn_server().await;
    let (socket, _) = connect_async(url).await.unwrap();
    let (mut sink, mut stream) = socket.split();

    sink.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    let reply = next_json(&mut stream).await;
    assert_eq!(reply["error"]["code"], -32600);
}
