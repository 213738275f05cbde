//! HTTP request handlers

pub mod health;
pub mod mcp;
pub mod plugins;

pub use health::*;
pub use mcp::*;
pub use plugins::*;
