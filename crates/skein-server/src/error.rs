//! Error types for the Skein server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use skein_mcp::plugin::PluginError;
use skein_mcp::registry::RegistryError;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            ServerError::Plugin(PluginError::NotFound(_)) => (
                StatusCode::NOT_FOUND,
                "plugin_not_found",
                "Check the plugin name against GET /plugins",
            ),
            ServerError::Plugin(PluginError::AlreadyActive(_)) => (
                StatusCode::CONFLICT,
                "plugin_already_active",
                "Reload the plugin instead of enabling it again",
            ),
            ServerError::Plugin(PluginError::Conflict { .. }) => (
                StatusCode::CONFLICT,
                "plugin_conflict",
                "Rename the conflicting tool or resource, or disable the other provider",
            ),
            ServerError::Plugin(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "plugin_error",
                "Inspect the plugin's last error in GET /plugins",
            ),
            ServerError::Registry(_) => (
                StatusCode::CONFLICT,
                "registry_conflict",
                "Each tool name and resource URI may be registered once",
            ),
            ServerError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "Check the request format and required parameters",
            ),
            ServerError::WebSocket(_) => (
                StatusCode::BAD_REQUEST,
                "websocket_error",
                "Check WebSocket connection and message format",
            ),
            ServerError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                "Contact system administrator - server configuration issue",
            ),
            ServerError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                "Check file system permissions and disk space",
            ),
            ServerError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "json_parse_error",
                "Check JSON syntax and format",
            ),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_server_error",
                "Contact support if this error persists",
            ),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_type, suggestion) = self.classify();

        let error_response = json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "code": status.as_u16(),
                "suggestion": suggestion,
                "timestamp": chrono::Utc::now().timestamp(),
                "request_id": generate_request_id()
            }
        });

        (status, Json(error_response)).into_response()
    }
}

/// Generate a unique request ID for error tracking
fn generate_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}
