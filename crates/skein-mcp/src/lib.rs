//! Skein MCP - Model Context Protocol runtime
//!
//! Transports (WebSocket, HTTP, child process) that correlate requests with
//! responses, a plugin lifecycle manager, and the router that serves MCP
//! requests against built-in and plugin-provided capabilities.

// Core modules
pub mod types;
pub mod protocol;
pub mod pending;
pub mod transport;
pub mod client;

// Server side
pub mod plugin;
pub mod registry;
pub mod validation;
pub mod router;
pub mod builtin;

// Re-export commonly used types
pub use client::{ClientError, McpClient};
pub use pending::PendingCalls;
pub use plugin::{Plugin, PluginConfig, PluginError, PluginInfo, PluginManager, PluginState, StaticPluginLoader};
pub use protocol::{McpHandler, McpResult, ResourceHandler, ToolHandler, ValidationError};
pub use registry::CapabilityRegistry;
pub use router::{McpRouter, RouterError};
pub use transport::{connect_transport, Transport, TransportError, TransportEvent, TransportSettings};
pub use types::{McpError, McpMessage, McpNotification, McpRequest, McpResponse, RequestId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::plugin::*;
    pub use crate::protocol::*;
    pub use crate::registry::*;
    pub use crate::router::*;
    pub use crate::transport::*;
    pub use crate::types::*;
    pub use crate::validation::*;
}
