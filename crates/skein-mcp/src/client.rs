//! Typed client over any [`Transport`]

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::transport::{Transport, TransportError};
use crate::types::{
    ClientInfo, InitializeRequest, InitializeResponse, McpCapabilities, McpError, McpNotification, McpRequest,
    ResourceInfo, ResourceReadResponse, ToolCallResponse, ToolInfo, MCP_VERSION,
};

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with an error object
    #[error("Server error {}: {}", .0.code, .0.message)]
    Server(McpError),

    #[error("Unexpected result shape: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// Error code reported by the server, if any
    pub fn code(&self) -> Option<i32> {
        match self {
            ClientError::Server(err) => Some(err.code),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// MCP client speaking through a connected transport
#[derive(Clone)]
pub struct McpClient {
    transport: Arc<dyn Transport>,
    client_info: ClientInfo,
}

impl McpClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            client_info: ClientInfo {
                name: "skein-client".to_string(),
                version: crate::VERSION.to_string(),
            },
        }
    }

    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Issue one request and return its raw `result`
    pub async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        let request = McpRequest::new(method, params);
        debug!(id = %request.id, method = %method, "client request");
        let response = self.transport.send(request).await?;
        response.into_result().map_err(ClientError::Server)
    }

    async fn request_as<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> ClientResult<T> {
        let result = self.request(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Handshake, then announce `notifications/initialized`
    pub async fn initialize(&self) -> ClientResult<InitializeResponse> {
        let params = InitializeRequest {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: McpCapabilities::default(),
            client_info: Some(self.client_info.clone()),
        };
        let response: InitializeResponse = self
            .request_as("initialize", Some(serde_json::to_value(params)?))
            .await?;
        self.transport
            .notify(McpNotification::new("notifications/initialized", None))
            .await?;
        Ok(response)
    }

    pub async fn ping(&self) -> ClientResult<()> {
        self.request("ping", None).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> ClientResult<Vec<ToolInfo>> {
        let mut result = self.request("tools/list", None).await?;
        Ok(serde_json::from_value(result["tools"].take())?)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> ClientResult<ToolCallResponse> {
        self.request_as("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    pub async fn list_resources(&self) -> ClientResult<Vec<ResourceInfo>> {
        let mut result = self.request("resources/list", None).await?;
        Ok(serde_json::from_value(result["resources"].take())?)
    }

    pub async fn read_resource(&self, uri: &str) -> ClientResult<ResourceReadResponse> {
        self.request_as("resources/read", Some(json!({ "uri": uri }))).await
    }

    pub async fn server_info(&self) -> ClientResult<Value> {
        self.request("server/info", None).await
    }
}
