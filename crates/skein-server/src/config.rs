//! Server configuration

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use skein_mcp::builtin::BuiltinConfig;
use skein_mcp::plugin::PluginConfig;
use skein_mcp::types::ServerInfo;

use crate::error::{ServerError, ServerResult};

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server binding address
    pub bind: SocketAddr,

    /// MCP configuration
    pub mcp: McpConfig,

    /// Request limits
    pub limits: RequestLimits,

    /// Framing for `skein-server stdio`
    pub stdio: StdioConfig,
}

/// MCP-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Name advertised in `initialize` and `server/info`
    pub server_name: String,

    /// Built-in tool settings
    pub builtins: BuiltinConfig,

    /// Plugins loaded at startup, in order
    pub plugins: Vec<PluginConfig>,
}

/// Request size and time limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Request timeout in seconds
    pub request_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StdioConfig {
    pub delimiter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            mcp: McpConfig::default(),
            limits: RequestLimits::default(),
            stdio: StdioConfig::default(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            server_name: "skein".to_string(),
            builtins: BuiltinConfig::default(),
            plugins: vec![
                PluginConfig::new("clock").with_config(json!({})),
                PluginConfig::new("notes").with_config(json!({ "max_notes": 1000 })),
            ],
        }
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10MB
            request_timeout: 300,
        }
    }
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            delimiter: "\n".to_string(),
        }
    }
}

impl McpConfig {
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.server_name.clone(),
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file, with `SKEIN_` environment overrides
    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("SKEIN").separator("__"))
            .build()
            .map_err(|e| ServerError::Config(format!("Failed to load config: {}", e)))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| ServerError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file(&self, path: &Path) -> ServerResult<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ServerError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.limits.max_body_size == 0 {
            return Err(ServerError::Config("limits.max_body_size must be positive".to_string()));
        }
        if self.stdio.delimiter.is_empty() {
            return Err(ServerError::Config("stdio.delimiter must not be empty".to_string()));
        }
        let mut names = std::collections::HashSet::new();
        for plugin in &self.mcp.plugins {
            if !names.insert(plugin.name.as_str()) {
                return Err(ServerError::Config(format!("duplicate plugin name '{}'", plugin.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("skein-server.toml");

        ServerConfig::default().to_file(&path).unwrap();
        let loaded = ServerConfig::from_file(&path).unwrap();

        assert_eq!(loaded.bind, ServerConfig::default().bind);
        assert_eq!(loaded.mcp.plugins.len(), 2);
        assert_eq!(loaded.mcp.plugins[0].name, "clock");
        assert_eq!(loaded.stdio.delimiter, "\n");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            r#"
bind = "0.0.0.0:9000"

[[mcp.plugins]]
name = "notes"
enabled = false
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.mcp.plugins.len(), 1);
        assert!(!config.mcp.plugins[0].enabled);
        assert_eq!(config.limits.max_body_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_duplicate_plugin_names_rejected() {
        let mut config = ServerConfig::default();
        config.mcp.plugins.push(PluginConfig::new("clock"));
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }
}
