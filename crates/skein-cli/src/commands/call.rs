//! Invoke one tool

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde_json::{Map, Value};
use tracing::info;

use skein_mcp::client::McpClient;

use crate::commands::Command;
use crate::utils::{create_spinner, print_output, render_tool_content};

#[derive(Args, Debug)]
pub struct CallCommand {
    /// Tool name
    pub name: String,

    /// Arguments as a JSON object
    #[arg(long, conflicts_with = "params")]
    pub json_args: Option<String>,

    /// Argument as key=value; values parse as JSON when they can
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

#[async_trait]
impl Command for CallCommand {
    async fn execute(&self, client: &McpClient, json_output: bool) -> Result<()> {
        let arguments = self.arguments()?;
        client.initialize().await?;

        info!(tool = %self.name, "calling tool");
        let spinner = create_spinner(&format!("Calling {}...", self.name));
        let result = client.call_tool(&self.name, arguments).await;
        spinner.finish_and_clear();
        let response = result?;

        if json_output {
            print_output(&serde_json::to_value(&response)?, true)?;
        } else {
            for content in &response.content {
                println!("{}", render_tool_content(content));
            }
        }

        if response.is_error == Some(true) {
            bail!("tool '{}' reported an error", self.name);
        }
        Ok(())
    }
}

impl CallCommand {
    fn arguments(&self) -> Result<Value> {
        if let Some(raw) = &self.json_args {
            let value: Value = serde_json::from_str(raw).context("--json-args is not valid JSON")?;
            if !value.is_object() {
                bail!("--json-args must be a JSON object");
            }
            return Ok(value);
        }

        let mut map = Map::new();
        for pair in &self.params {
            let (key, raw) = pair
                .split_once('=')
                .with_context(|| format!("'{}' is not KEY=VALUE", pair))?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            map.insert(key.to_string(), value);
        }
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(params: &[&str]) -> CallCommand {
        CallCommand {
            name: "t".to_string(),
            json_args: None,
            params: params.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_params_parse_json_or_string() {
        let args = command(&["message=hello", "count=3", "flag=true"]).arguments().unwrap();
        assert_eq!(args, json!({"message": "hello", "count": 3, "flag": true}));
    }

    #[test]
    fn test_param_without_equals_rejected() {
        assert!(command(&["oops"]).arguments().is_err());
    }

    #[test]
    fn test_json_args_must_be_object() {
        let cmd = CallCommand {
            name: "t".to_string(),
            json_args: Some("[1, 2]".to_string()),
            params: Vec::new(),
        };
        assert!(cmd.arguments().is_err());
    }
}
