//! Wall-clock plugin: `current_time` tool and `clock://now` resource

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use skein_mcp::prelude::*;

pub const NOW_URI: &str = "clock://now";

pub struct ClockPlugin;

#[async_trait]
impl Plugin for ClockPlugin {
    fn version(&self) -> String {
        crate::VERSION.to_string()
    }

    fn tools(&self) -> Vec<Arc<dyn ToolHandler>> {
        vec![Arc::new(CurrentTimeTool)]
    }

    fn resources(&self) -> Vec<Arc<dyn ResourceHandler>> {
        vec![Arc::new(NowResource)]
    }
}

struct CurrentTimeTool;

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "current_time".to_string(),
            description: "Current time, optionally shifted to a UTC offset".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "format": {"type": "string", "enum": ["rfc3339", "unix"], "default": "rfc3339"},
                    "utc_offset_minutes": {"type": "integer", "minimum": -1440, "maximum": 1440, "default": 0}
                }
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        let now = Utc::now();
        let format = arguments.get("format").and_then(Value::as_str).unwrap_or("rfc3339");
        if format == "unix" {
            return Ok(ToolCallResponse::text(now.timestamp().to_string()));
        }

        let minutes = arguments
            .get("utc_offset_minutes")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let seconds = i32::try_from(minutes * 60)?;
        let offset = FixedOffset::east_opt(seconds)
            .ok_or_else(|| anyhow::anyhow!("utc offset of {} minutes is out of range", minutes))?;
        Ok(ToolCallResponse::text(now.with_timezone(&offset).to_rfc3339()))
    }
}

struct NowResource;

#[async_trait]
impl ResourceHandler for NowResource {
    fn resource_info(&self) -> ResourceInfo {
        ResourceInfo {
            uri: NOW_URI.to_string(),
            name: "Current time".to_string(),
            description: Some("UTC time at the moment of reading".to_string()),
            mime_type: Some("application/json".to_string()),
        }
    }

    async fn read(&self, uri: &str) -> anyhow::Result<ResourceReadResponse> {
        let now = Utc::now();
        let body = json!({"utc": now.to_rfc3339(), "unix": now.timestamp()});
        Ok(ResourceReadResponse::text(uri, Some("application/json"), body.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offset_applied() {
        let result = CurrentTimeTool
            .execute(json!({"format": "rfc3339", "utc_offset_minutes": 120}))
            .await
            .unwrap();
        assert!(result.text_content().ends_with("+02:00"), "got {}", result.text_content());
    }

    #[tokio::test]
    async fn test_unix_format() {
        let result = CurrentTimeTool.execute(json!({"format": "unix"})).await.unwrap();
        assert!(result.text_content().parse::<i64>().unwrap() > 1_600_000_000);
    }

    #[tokio::test]
    async fn test_now_resource_is_json() {
        let response = NowResource.read(NOW_URI).await.unwrap();
        let ResourceContent::Text { text, .. } = &response.contents[0] else {
            panic!("expected text content");
        };
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert!(parsed["unix"].is_i64());
    }
}
