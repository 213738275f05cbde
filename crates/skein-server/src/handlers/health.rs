//! Health check handler

use crate::{error::ServerResult, server::ServerState};
use axum::{extract::State, Json};
use serde_json::{json, Value};

/// Liveness plus a count of active plugins
pub async fn health_check(State(state): State<ServerState>) -> ServerResult<Json<Value>> {
    let uptime = chrono::Utc::now() - state.started_at;
    Ok(Json(json!({
        "status": "ok",
        "service": "skein-server",
        "version": crate::VERSION,
        "plugins_active": state.registry.plugins().active_count(),
        "tools": state.registry.tool_count(),
        "resources": state.registry.resource_count(),
        "uptime_seconds": uptime.num_seconds(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
