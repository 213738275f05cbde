//! Round-trip latency check

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use serde_json::json;
use std::time::{Duration, Instant};

use skein_mcp::client::McpClient;

use crate::commands::Command;
use crate::utils::{format_duration, print_output};

#[derive(Args, Debug)]
pub struct PingCommand {
    /// Number of pings to send
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: u32,
}

#[async_trait]
impl Command for PingCommand {
    async fn execute(&self, client: &McpClient, json_output: bool) -> Result<()> {
        let mut samples = Vec::with_capacity(self.count as usize);
        for _ in 0..self.count.max(1) {
            let started = Instant::now();
            client.ping().await?;
            let elapsed = started.elapsed();
            if !json_output {
                println!("pong in {}", format_duration(elapsed));
            }
            samples.push(elapsed);
        }

        let total: Duration = samples.iter().sum();
        let average = total / samples.len() as u32;
        if json_output {
            let millis: Vec<u128> = samples.iter().map(Duration::as_millis).collect();
            print_output(&json!({ "samples_ms": millis, "average_ms": average.as_millis() }), true)?;
        } else if samples.len() > 1 {
            println!("average {}", format_duration(average));
        }
        Ok(())
    }
}
