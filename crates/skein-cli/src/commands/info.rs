//! Server identity, capabilities and plugin status

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use console::style;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};
use tracing::debug;

use skein_mcp::client::McpClient;

use crate::commands::Command;
use crate::utils::{print_output, print_warning};

#[derive(Args, Debug)]
pub struct InfoCommand {
    /// Skip the plugin table
    #[arg(long)]
    pub no_plugins: bool,
}

#[derive(Tabled)]
struct PluginRow {
    name: String,
    version: String,
    state: String,
}

#[async_trait]
impl Command for InfoCommand {
    async fn execute(&self, client: &McpClient, json_output: bool) -> Result<()> {
        let init = client.initialize().await?;

        // Not every server implements server/info
        let details = match client.server_info().await {
            Ok(details) => Some(details),
            Err(e) => {
                debug!(error = %e, "server/info unavailable");
                None
            }
        };

        if json_output {
            let mut info = json!({ "initialize": init });
            if let Some(details) = details {
                info["server"] = details;
            }
            return print_output(&info, true);
        }

        println!("{}", style("Server").bold().underlined());
        println!("  Name:     {}", init.server_info.name);
        println!("  Version:  {}", init.server_info.version);
        println!("  Protocol: {}", init.protocol_version);
        println!(
            "  Tools:    {}",
            if init.capabilities.tools.is_some() { "yes" } else { "no" }
        );
        println!(
            "  Resources: {}",
            if init.capabilities.resources.is_some() { "yes" } else { "no" }
        );

        if self.no_plugins {
            return Ok(());
        }
        match details.as_ref().and_then(|d| d.get("plugins")).and_then(Value::as_array) {
            Some(plugins) if !plugins.is_empty() => {
                let rows: Vec<PluginRow> = plugins.iter().map(plugin_row).collect();
                println!();
                println!("{}", style("Plugins").bold().underlined());
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
            Some(_) => println!("\nNo plugins loaded"),
            None => print_warning("server did not report plugin status"),
        }
        Ok(())
    }
}

fn plugin_row(plugin: &Value) -> PluginRow {
    let field = |key: &str| plugin.get(key).and_then(Value::as_str).unwrap_or("-").to_string();
    PluginRow {
        name: field("name"),
        version: field("version"),
        state: field("state"),
    }
}
