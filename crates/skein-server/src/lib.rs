//! Skein Server - MCP over HTTP, WebSocket and stdio
//!
//! Hosts a [`skein_mcp::McpRouter`] with the built-in capabilities and the
//! bundled plugins, and exposes plugin lifecycle management over REST.

/// Version of the skein-server crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod error;
pub mod handlers;
pub mod plugins;
pub mod server;
pub mod stdio;
pub mod websocket;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::SkeinServer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{config::*, error::*, handlers::*, server::*, stdio::*, websocket::*};
}
