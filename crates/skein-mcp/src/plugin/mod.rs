//! Plugin system for MCP
//!
//! Plugins contribute tools and resources. Which implementation backs a
//! plugin name is decided by a [`PluginLoader`]; the [`PluginManager`] owns
//! the lifecycle and reports the union of capabilities of active plugins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::protocol::{ResourceHandler, ToolHandler};

pub mod loader;
pub mod manager;

pub use loader::{PluginFactory, PluginLoader, StaticPluginLoader};
pub use manager::PluginManager;

/// Default bound on a plugin's `initialize` hook
pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 30_000;

/// Plugin trait that all MCP plugins must implement
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Version reported when the config does not pin one
    fn version(&self) -> String {
        "0.1.0".to_string()
    }

    fn tools(&self) -> Vec<Arc<dyn ToolHandler>> {
        Vec::new()
    }

    fn resources(&self) -> Vec<Arc<dyn ResourceHandler>> {
        Vec::new()
    }

    /// Called once before the plugin becomes active
    async fn initialize(&self, config: &Value) -> anyhow::Result<()> {
        let _ = config;
        Ok(())
    }

    /// Called when an active plugin is unloaded
    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Plugin lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unloaded,
    Loading,
    Active,
    Error,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginState::Unloaded => "unloaded",
            PluginState::Loading => "loading",
            PluginState::Active => "active",
            PluginState::Error => "error",
        };
        f.write_str(name)
    }
}

fn default_enabled() -> bool {
    true
}

/// How a plugin is configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Unique name within the manager
    pub name: String,
    /// Loader key; defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Passed to the plugin's `initialize` hook
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_timeout_ms: Option<u64>,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: None,
            version: None,
            enabled: true,
            config: Value::Null,
            init_timeout_ms: None,
        }
    }

    pub fn with_plugin(mut self, key: impl Into<String>) -> Self {
        self.plugin = Some(key.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn loader_key(&self) -> &str {
        self.plugin.as_deref().unwrap_or(&self.name)
    }
}

/// Snapshot of one managed plugin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    pub tools: Vec<String>,
    pub resources: Vec<String>,
}

/// Plugin errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("No implementation registered for plugin '{name}' (loader key '{key}')")]
    UnknownImplementation { name: String, key: String },

    #[error("Plugin '{0}' is already active")]
    AlreadyActive(String),

    #[error("Plugin '{name}' failed to initialize: {reason}")]
    InitializationFailed { name: String, reason: String },

    #[error("Plugin '{name}' did not initialize within {timeout_ms}ms")]
    InitializationTimeout { name: String, timeout_ms: u64 },

    #[error("Plugin '{name}' conflicts on {kind} '{key}' already provided by {owner}")]
    Conflict {
        name: String,
        kind: &'static str,
        key: String,
        owner: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config: PluginConfig = serde_json::from_value(json!({"name": "clock"})).unwrap();
        assert!(config.enabled);
        assert_eq!(config.loader_key(), "clock");
        assert_eq!(config.config, Value::Null);

        let aliased = PluginConfig::new("work-notes").with_plugin("notes");
        assert_eq!(aliased.loader_key(), "notes");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PluginState::Active.to_string(), "active");
        assert_eq!(serde_json::to_value(PluginState::Error).unwrap(), json!("error"));
    }
}
