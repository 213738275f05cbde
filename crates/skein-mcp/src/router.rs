//! Server-side request router
//!
//! Every request yields exactly one well-formed response. Handler failures
//! become error objects and handler panics become a generic internal error.

use futures::FutureExt;
use regex::Regex;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};

use crate::protocol::validate_request;
use crate::registry::CapabilityRegistry;
use crate::types::{
    error_codes, InitializeResponse, McpCapabilities, McpError, McpMessage, McpNotification, McpRequest,
    McpResponse, RequestId, ServerInfo, MCP_VERSION,
};
use crate::validation::{JsonSchemaValidator, SchemaValidator};

/// Why a request could not be served
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouterError {
    #[error("Method not found: {0}")]
    UnknownMethod(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Resource not found: {0}")]
    UnknownResource(String),

    #[error("Missing required parameter: {0}")]
    MissingParam(&'static str),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Failed to read resource: {0}")]
    ResourceRead(String),

    #[error("{0}")]
    Handler(McpError),
}

impl From<RouterError> for McpError {
    fn from(err: RouterError) -> Self {
        let code = match &err {
            RouterError::UnknownMethod(_) => error_codes::METHOD_NOT_FOUND,
            RouterError::UnknownTool(_) => error_codes::UNKNOWN_TOOL,
            RouterError::UnknownResource(_) => error_codes::RESOURCE_NOT_FOUND,
            RouterError::MissingParam(_) | RouterError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            RouterError::ToolExecution(_) => error_codes::TOOL_EXECUTION_ERROR,
            RouterError::ResourceRead(_) => error_codes::INTERNAL_ERROR,
            RouterError::Handler(inner) => return inner.clone(),
        };
        McpError::new(code, err.to_string())
    }
}

/// Keep the first line and mask absolute filesystem paths
pub fn sanitize_message(message: &str) -> String {
    static PATHS: OnceLock<Option<Regex>> = OnceLock::new();
    let first_line = message.lines().next().unwrap_or_default().trim();
    let paths = PATHS.get_or_init(|| Regex::new(r#"(^|[\s'"(=])(/[^\s'"()]+|[A-Za-z]:\\[^\s'"()]+)"#).ok());
    match paths {
        Some(re) => re.replace_all(first_line, "${1}<path>").into_owned(),
        None => first_line.to_string(),
    }
}

/// Dispatches decoded messages against the capability registry
pub struct McpRouter {
    registry: Arc<CapabilityRegistry>,
    validator: Arc<dyn SchemaValidator>,
    server_info: ServerInfo,
}

impl McpRouter {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            validator: Arc::new(JsonSchemaValidator::new()),
            server_info: ServerInfo::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_server_info(mut self, server_info: ServerInfo) -> Self {
        self.server_info = server_info;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Handle raw bytes holding one message or a batch
    pub async fn handle_bytes(&self, bytes: &[u8]) -> Option<Value> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                debug!(error = %e, "unparsable request body");
                Some(response_value(&McpResponse::failure(None, McpError::parse_error(e))))
            }
        }
    }

    /// Handle a decoded JSON value; arrays are batches answered in order
    pub async fn handle_value(&self, value: Value) -> Option<Value> {
        match value {
            Value::Array(items) if items.is_empty() => Some(response_value(&McpResponse::failure(
                None,
                McpError::invalid_request("empty batch"),
            ))),
            Value::Array(items) => {
                let mut responses = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(response) = self.handle_single(item).await {
                        responses.push(response_value(&response));
                    }
                }
                (!responses.is_empty()).then_some(Value::Array(responses))
            }
            single => self.handle_single(single).await.map(|r| response_value(&r)),
        }
    }

    async fn handle_single(&self, value: Value) -> Option<McpResponse> {
        let id = value
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
        match McpMessage::from_value(value) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Some(McpResponse::failure(id, McpError::invalid_request(e))),
        }
    }

    /// Requests get a response; notifications and stray responses do not
    pub async fn handle_message(&self, message: McpMessage) -> Option<McpResponse> {
        match message {
            McpMessage::Request(request) => Some(self.handle_request(request).await),
            McpMessage::Notification(notification) => {
                self.handle_notification(notification).await;
                None
            }
            McpMessage::Response(response) => {
                debug!(id = ?response.id, "ignoring response sent to router");
                None
            }
        }
    }

    pub async fn handle_request(&self, request: McpRequest) -> McpResponse {
        let id = request.id.clone();
        if let Err(e) = validate_request(&request) {
            return McpResponse::failure(Some(id), McpError::invalid_request(e));
        }
        let method = request.method.clone();
        debug!(id = %id, method = %method, "handling request");

        match AssertUnwindSafe(self.dispatch(request)).catch_unwind().await {
            Ok(Ok(result)) => McpResponse::success(id, result),
            Ok(Err(e)) => {
                debug!(id = %id, method = %method, error = %e, "request failed");
                McpResponse::failure(Some(id), e.into())
            }
            Err(_) => {
                error!(id = %id, method = %method, "handler panicked");
                McpResponse::failure(Some(id), McpError::internal())
            }
        }
    }

    pub async fn handle_notification(&self, notification: McpNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => debug!("client initialized"),
            method => match self.registry.get_handler(method) {
                Some(handler) => {
                    let outcome = AssertUnwindSafe(handler.handle_notification(method, notification.params))
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(method = %method, error = %e, "notification handler failed"),
                        Err(_) => error!(method = %method, "notification handler panicked"),
                    }
                }
                None => debug!(method = %method, "ignoring notification"),
            },
        }
    }

    async fn dispatch(&self, request: McpRequest) -> Result<Value, RouterError> {
        match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.list_tools() })),
            "tools/call" => self.call_tool(request.params).await,
            "resources/list" => Ok(json!({ "resources": self.registry.list_resources() })),
            "resources/read" => self.read_resource(request.params).await,
            "server/info" => Ok(self.server_info()),
            method => {
                let handler = self
                    .registry
                    .get_handler(method)
                    .ok_or_else(|| RouterError::UnknownMethod(method.to_string()))?;
                handler
                    .handle_request(method, request.params)
                    .await
                    .map_err(RouterError::Handler)
            }
        }
    }

    fn initialize(&self) -> Value {
        let response = InitializeResponse {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: McpCapabilities {
                tools: Some(json!({})),
                resources: Some(json!({})),
                ..Default::default()
            },
            server_info: self.server_info.clone(),
        };
        serde_json::to_value(response).unwrap_or_else(|_| json!({}))
    }

    fn server_info(&self) -> Value {
        let plugins: Vec<Value> = self
            .registry
            .plugins()
            .list()
            .into_iter()
            .map(|p| json!({ "name": p.name, "version": p.version, "state": p.state }))
            .collect();
        json!({
            "name": self.server_info.name,
            "version": self.server_info.version,
            "protocolVersion": MCP_VERSION,
            "tools": self.registry.tool_count(),
            "resources": self.registry.resource_count(),
            "plugins": plugins,
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, RouterError> {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or(RouterError::MissingParam("name"))?;
        let tool = self
            .registry
            .get_tool(name)
            .ok_or_else(|| RouterError::UnknownTool(name.to_string()))?;

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(arguments) => arguments.clone(),
        };
        let arguments = self
            .validator
            .validate(arguments, &tool.tool_info().input_schema)
            .map_err(RouterError::InvalidParams)?;

        match tool.execute(arguments).await {
            Ok(response) => serde_json::to_value(response)
                .map_err(|e| RouterError::ToolExecution(sanitize_message(&e.to_string()))),
            Err(e) => {
                warn!(tool = %name, error = %e, "tool failed");
                Err(RouterError::ToolExecution(sanitize_message(&e.to_string())))
            }
        }
    }

    async fn read_resource(&self, params: Option<Value>) -> Result<Value, RouterError> {
        let params = params.unwrap_or(Value::Null);
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or(RouterError::MissingParam("uri"))?;
        let resource = self
            .registry
            .get_resource(uri)
            .ok_or_else(|| RouterError::UnknownResource(uri.to_string()))?;

        match resource.read(uri).await {
            Ok(contents) => serde_json::to_value(contents)
                .map_err(|e| RouterError::ResourceRead(sanitize_message(&e.to_string()))),
            Err(e) => {
                warn!(uri = %uri, error = %e, "resource read failed");
                Err(RouterError::ResourceRead(sanitize_message(&e.to_string())))
            }
        }
    }
}

fn response_value(response: &McpResponse) -> Value {
    serde_json::to_value(response).unwrap_or_else(|_| {
        json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": error_codes::INTERNAL_ERROR, "message": "Internal server error"}
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_masks_paths_and_extra_lines() {
        let message = "failed to open /home/alice/secret.txt: denied\n   at frame 3";
        assert_eq!(sanitize_message(message), "failed to open <path> denied");

        let windows = r"cannot read C:\Users\bob\file.txt";
        assert_eq!(sanitize_message(windows), "cannot read <path>");

        assert_eq!(sanitize_message("Echo: hi"), "Echo: hi");
        assert_eq!(sanitize_message("fetch https://example.com/a failed"), "fetch https://example.com/a failed");
    }

    #[test]
    fn test_router_error_codes() {
        let err: McpError = RouterError::UnknownTool("missing_tool".into()).into();
        assert_eq!(err.code, error_codes::UNKNOWN_TOOL);
        assert_eq!(err.message, "Unknown tool: missing_tool");

        let err: McpError = RouterError::MissingParam("uri").into();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_handler_error_passes_through() {
        let original = McpError::new(-32050, "quota exceeded").with_data(json!({"retry_after": 30}));
        let err: McpError = RouterError::Handler(original.clone()).into();
        assert_eq!(err, original);
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let router = McpRouter::new(Arc::new(CapabilityRegistry::default()));
        let body = router.handle_bytes(b"{oops").await.unwrap();
        assert_eq!(body["error"]["code"], json!(error_codes::PARSE_ERROR));
        assert!(body["id"].is_null());
    }
}
