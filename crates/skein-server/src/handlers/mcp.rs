//! JSON-RPC over plain HTTP POST

use crate::server::ServerState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;

/// Route one message or batch. Notification-only bodies get `204 No Content`.
pub async fn handle_rpc(State(state): State<ServerState>, body: Bytes) -> Response {
    debug!(bytes = body.len(), "MCP request over HTTP");
    match state.router.handle_bytes(&body).await {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
