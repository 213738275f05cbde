//! Output helpers for the skein CLI

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::time::Duration;

use skein_mcp::types::{ResourceContent, ToolContent};

/// Create a spinner progress bar
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let spinner_style = ProgressStyle::default_spinner()
        .tick_strings(&["⠁", "⠂", "⠄", "⡀", "⢀", "⠠", "⠐", "⠈"])
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(spinner_style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;

    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else if seconds > 0 {
        format!("{}.{:03}s", seconds, duration.subsec_millis())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Print formatted output (JSON or human-readable)
pub fn print_output(data: &Value, json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        print_human_readable(data, 0);
    }
    Ok(())
}

fn print_human_readable(data: &Value, indent: usize) {
    let prefix = "  ".repeat(indent);
    match data {
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::Object(_) => {
                        println!("{}{}:", prefix, style(key).bold());
                        print_human_readable(value, indent + 1);
                    }
                    Value::Array(items) => {
                        println!("{}{}:", prefix, style(key).bold());
                        for (i, item) in items.iter().enumerate() {
                            println!("{}  {}: {}", prefix, i + 1, format_value(item));
                        }
                    }
                    _ => println!("{}{}: {}", prefix, style(key).bold(), format_value(value)),
                }
            }
        }
        _ => println!("{}{}", prefix, format_value(data)),
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

/// Render tool output for a terminal
pub fn render_tool_content(content: &ToolContent) -> String {
    match content {
        ToolContent::Text { text } => text.clone(),
        ToolContent::Image { mime_type, data } => format!("[{} image, {} base64 bytes]", mime_type, data.len()),
    }
}

/// Render resource contents for a terminal
pub fn render_resource_content(content: &ResourceContent) -> String {
    match content {
        ResourceContent::Text { text, .. } => text.clone(),
        ResourceContent::Blob { uri, blob, .. } => format!("[{}: {} base64 bytes]", uri, blob.len()),
    }
}

/// Print error with styling
pub fn print_error(message: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), message);
}

/// Print warning with styling
pub fn print_warning(message: &str) {
    eprintln!("{} {}", style("Warning:").yellow().bold(), message);
}
