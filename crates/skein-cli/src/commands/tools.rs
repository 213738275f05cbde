//! List the tools a server offers

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use skein_mcp::client::McpClient;

use crate::commands::Command;
use crate::utils::print_output;

#[derive(Args, Debug)]
pub struct ToolsCommand {
    /// Include each tool's input schema
    #[arg(long)]
    pub schema: bool,
}

#[derive(Tabled)]
struct ToolRow {
    name: String,
    description: String,
}

#[async_trait]
impl Command for ToolsCommand {
    async fn execute(&self, client: &McpClient, json_output: bool) -> Result<()> {
        client.initialize().await?;
        let mut tools = client.list_tools().await?;
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        if json_output {
            return print_output(&json!({ "tools": tools }), true);
        }
        if tools.is_empty() {
            println!("No tools available");
            return Ok(());
        }

        if self.schema {
            for tool in &tools {
                println!("{} - {}", console::style(&tool.name).bold(), tool.description);
                println!("{}", serde_json::to_string_pretty(&tool.input_schema)?);
                println!();
            }
        } else {
            let rows: Vec<ToolRow> = tools
                .into_iter()
                .map(|t| ToolRow {
                    name: t.name,
                    description: t.description,
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
        Ok(())
    }
}
