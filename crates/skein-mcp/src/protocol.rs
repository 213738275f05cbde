//! MCP protocol trait definitions, envelope validation and id generation

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use crate::types::*;

/// Result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Structural problems with an envelope. Raised locally, never transmitted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unsupported protocol version '{found}', expected '{expected}'")]
    UnsupportedVersion { found: String, expected: &'static str },

    #[error("response must carry exactly one of result or error")]
    AmbiguousOutcome,

    #[error("invalid error object: {0}")]
    InvalidErrorObject(String),

    #[error("request id {0} is already outstanding")]
    DuplicateId(RequestId),

    #[error("message size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Generate an id unique to this sender: unix millis plus a random suffix
pub fn generate_id() -> RequestId {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    RequestId::String(format!("{}-{}", chrono::Utc::now().timestamp_millis(), suffix))
}

fn check_version(jsonrpc: &str) -> Result<(), ValidationError> {
    if jsonrpc.is_empty() {
        return Err(ValidationError::MissingField("jsonrpc"));
    }
    if jsonrpc != JSONRPC_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            found: jsonrpc.to_string(),
            expected: JSONRPC_VERSION,
        });
    }
    Ok(())
}

/// Validate a request before it is put on the wire
pub fn validate_request(request: &McpRequest) -> Result<(), ValidationError> {
    check_version(&request.jsonrpc)?;
    if let RequestId::String(id) = &request.id {
        if id.is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
    }
    if request.method.trim().is_empty() {
        return Err(ValidationError::MissingField("method"));
    }
    Ok(())
}

/// Validate a response received from a peer
pub fn validate_response(response: &McpResponse) -> Result<(), ValidationError> {
    check_version(&response.jsonrpc)?;
    if response.id.is_none() {
        return Err(ValidationError::MissingField("id"));
    }
    match (&response.result, &response.error) {
        (Some(_), None) => Ok(()),
        (None, Some(error)) => {
            if error.message.is_empty() {
                Err(ValidationError::InvalidErrorObject("message is empty".to_string()))
            } else {
                Ok(())
            }
        }
        _ => Err(ValidationError::AmbiguousOutcome),
    }
}

/// Reject payloads above `max` bytes
pub fn check_size(size: usize, max: usize) -> Result<(), ValidationError> {
    if size > max {
        Err(ValidationError::TooLarge { size, max })
    } else {
        Ok(())
    }
}

/// MCP handler for processing additional method calls
#[async_trait]
pub trait McpHandler: Send + Sync {
    /// Get the method pattern this handler supports (e.g., "completion/complete", "logging/*")
    fn method_pattern(&self) -> &str;

    /// Handle a request for this method
    async fn handle_request(&self, method: &str, params: Option<Value>) -> McpResult<Value>;

    /// Handle a notification for this method
    async fn handle_notification(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let _ = (method, params);
        Ok(())
    }
}

/// Tool handler trait
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get tool information
    fn tool_info(&self) -> ToolInfo;

    /// Execute the tool with already-validated arguments
    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse>;
}

/// Resource handler trait
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Get resource information
    fn resource_info(&self) -> ResourceInfo;

    /// Read the resource
    async fn read(&self, uri: &str) -> anyhow::Result<ResourceReadResponse>;
}

/// Check if a method or URI matches a `prefix/*` pattern
pub fn matches_pattern(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => candidate
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false),
        None => pattern == candidate,
    }
}
