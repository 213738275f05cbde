//! Command implementations for the skein CLI

pub mod call;
pub mod info;
pub mod ping;
pub mod resources;
pub mod tools;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Args;

use skein_mcp::client::McpClient;
use skein_mcp::transport::{HttpConfig, ProcessConfig, TransportSettings, WebSocketConfig};

use crate::config::Config;

/// Trait for CLI command execution
#[async_trait]
pub trait Command {
    /// Execute the command against an initialized session
    async fn execute(&self, client: &McpClient, json_output: bool) -> Result<()>;
}

/// How to reach the server
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Server endpoint (ws://, wss://, http:// or https://)
    #[arg(short, long, global = true, env = "SKEIN_URL")]
    pub url: Option<String>,

    /// Spawn this program and speak MCP over its stdin/stdout instead
    #[arg(long = "command", global = true, conflicts_with = "url")]
    pub program: Option<String>,

    /// Argument for --command; repeat for several
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Per-call timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
}

impl ConnectArgs {
    /// Pick a transport from flags, falling back to the config file
    pub fn settings(&self, config: &Config) -> Result<TransportSettings> {
        let timeout_ms = self.timeout_ms.unwrap_or(config.connection.timeout_ms);

        if let Some(program) = &self.program {
            return Ok(TransportSettings::Process(ProcessConfig {
                command: program.clone(),
                args: self.args.clone(),
                delimiter: config.process.delimiter.clone(),
                timeout_ms,
                ..ProcessConfig::default()
            }));
        }

        let url = self.url.as_deref().unwrap_or(&config.connection.url);
        let (scheme, _) = url
            .split_once("://")
            .with_context(|| format!("'{}' is not a URL", url))?;
        match scheme {
            "ws" | "wss" => Ok(TransportSettings::Websocket(WebSocketConfig {
                url: url.to_string(),
                request_timeout_ms: timeout_ms,
                max_reconnect_attempts: 0,
                ..WebSocketConfig::default()
            })),
            "http" | "https" => Ok(TransportSettings::Http(HttpConfig {
                base_url: url.to_string(),
                timeout_ms,
                retry_attempts: config.http.retry_attempts,
                retry_delay_ms: config.http.retry_delay_ms,
                ..HttpConfig::default()
            })),
            other => bail!("unsupported URL scheme '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_selects_transport() {
        let config = Config::default();

        let ws = ConnectArgs::default().settings(&config).unwrap();
        assert!(matches!(ws, TransportSettings::Websocket(_)));

        let http = ConnectArgs {
            url: Some("https://example.com/mcp".to_string()),
            ..Default::default()
        };
        let TransportSettings::Http(http) = http.settings(&config).unwrap() else {
            panic!("expected http settings");
        };
        assert_eq!(http.retry_attempts, 3);
    }

    #[test]
    fn test_command_wins_and_carries_args() {
        let args = ConnectArgs {
            program: Some("skein-server".to_string()),
            args: vec!["stdio".to_string()],
            timeout_ms: Some(500),
            ..Default::default()
        };
        let TransportSettings::Process(process) = args.settings(&Config::default()).unwrap() else {
            panic!("expected process settings");
        };
        assert_eq!(process.args, vec!["stdio"]);
        assert_eq!(process.timeout_ms, 500);
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let args = ConnectArgs {
            url: Some("ftp://example.com".to_string()),
            ..Default::default()
        };
        let err = args.settings(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));
    }
}
