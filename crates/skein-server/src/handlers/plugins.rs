//! Plugin lifecycle endpoints

use crate::{error::ServerResult, server::ServerState};
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use skein_mcp::plugin::{PluginError, PluginInfo};

/// List every managed plugin, whatever its state
pub async fn list_plugins(State(state): State<ServerState>) -> ServerResult<Json<Value>> {
    let plugins = state.registry.plugins().list();
    Ok(Json(json!({
        "total": plugins.len(),
        "active": state.registry.plugins().active_count(),
        "plugins": plugins,
    })))
}

pub async fn get_plugin(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> ServerResult<Json<PluginInfo>> {
    let info = state
        .registry
        .plugins()
        .get(&name)
        .ok_or(PluginError::NotFound(name))?;
    Ok(Json(info))
}

/// Cleanup, then initialize again with the stored config
pub async fn reload_plugin(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> ServerResult<Json<PluginInfo>> {
    info!(plugin = %name, "reload requested");
    let info = state.registry.plugins().reload(&name).await?;
    Ok(Json(info))
}

pub async fn enable_plugin(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> ServerResult<Json<PluginInfo>> {
    info!(plugin = %name, "enable requested");
    let info = state.registry.plugins().set_enabled(&name, true).await?;
    Ok(Json(info))
}

pub async fn disable_plugin(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> ServerResult<Json<PluginInfo>> {
    info!(plugin = %name, "disable requested");
    let info = state.registry.plugins().set_enabled(&name, false).await?;
    Ok(Json(info))
}
