//! WebSocket endpoint: one JSON-RPC message or batch per text frame

use crate::server::ServerState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use skein_mcp::types::{McpError, McpResponse};

/// Outgoing frames buffered per connection
const OUTBOUND_BUFFER: usize = 64;

/// Upgrade HTTP to WebSocket
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    let max = state.config.limits.max_body_size;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ServerState) {
    let connection_id = Uuid::new_v4().to_string();
    let connected_at = chrono::Utc::now();
    info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    // Replies may finish out of order, so a single task owns the sink
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = sender.send(message).await {
                error!("Failed to send WebSocket frame: {}", e);
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!(connection_id = %connection_id, message_length = text.len(), "Received text message");
                let router = state.router.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(reply) = router.handle_bytes(text.as_bytes()).await {
                        let _ = tx.send(Message::Text(reply.to_string())).await;
                    }
                });
            }
            Ok(Message::Binary(data)) => {
                debug!(connection_id = %connection_id, data_length = data.len(), "Received binary message (not supported)");
                if tx.send(Message::Text(binary_rejection().to_string())).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                if tx.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(frame)) => {
                info!(
                    connection_id = %connection_id,
                    close_code = ?frame.as_ref().map(|f| f.code),
                    "WebSocket connection closed by client"
                );
                break;
            }
            Err(e) => {
                warn!(connection_id = %connection_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    drop(tx);
    let _ = writer.await;
    info!(
        connection_id = %connection_id,
        duration = ?(chrono::Utc::now() - connected_at),
        "WebSocket connection closed"
    );
}

fn binary_rejection() -> Value {
    let response = McpResponse::failure(None, McpError::invalid_request("binary frames are not supported"));
    serde_json::to_value(response).unwrap_or(Value::Null)
}
