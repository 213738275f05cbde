//! List and read resources

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use skein_mcp::client::McpClient;

use crate::commands::Command;
use crate::utils::{print_output, render_resource_content};

#[derive(Args, Debug)]
pub struct ResourcesCommand {}

#[derive(Tabled)]
struct ResourceRow {
    uri: String,
    name: String,
    #[tabled(rename = "mime type")]
    mime_type: String,
}

#[async_trait]
impl Command for ResourcesCommand {
    async fn execute(&self, client: &McpClient, json_output: bool) -> Result<()> {
        client.initialize().await?;
        let resources = client.list_resources().await?;

        if json_output {
            return print_output(&json!({ "resources": resources }), true);
        }
        if resources.is_empty() {
            println!("No resources available");
            return Ok(());
        }

        let rows: Vec<ResourceRow> = resources
            .into_iter()
            .map(|r| ResourceRow {
                uri: r.uri,
                name: r.name,
                mime_type: r.mime_type.unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct ReadCommand {
    /// Resource URI, e.g. file:///notes.txt
    pub uri: String,
}

#[async_trait]
impl Command for ReadCommand {
    async fn execute(&self, client: &McpClient, json_output: bool) -> Result<()> {
        client.initialize().await?;
        let response = client.read_resource(&self.uri).await?;

        if json_output {
            return print_output(&serde_json::to_value(&response)?, true);
        }
        for content in &response.contents {
            println!("{}", render_resource_content(content));
        }
        Ok(())
    }
}
