//! Plugin lifecycle through the manager and the router

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use skein_mcp::builtin::EchoTool;
use skein_mcp::prelude::*;

struct StaticTool {
    name: String,
}

#[async_trait]
impl ToolHandler for StaticTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: format!("{} from a plugin", self.name),
            input_schema: json!({"type": "object"}),
        }
    }

    async fn execute(&self, _arguments: Value) -> anyhow::Result<ToolCallResponse> {
        Ok(ToolCallResponse::text(format!("{} ran", self.name)))
    }
}

struct ToolPlugin {
    tool: String,
    broken: bool,
}

#[async_trait]
impl Plugin for ToolPlugin {
    fn tools(&self) -> Vec<Arc<dyn ToolHandler>> {
        vec![Arc::new(StaticTool { name: self.tool.clone() })]
    }

    async fn initialize(&self, _config: &Value) -> anyhow::Result<()> {
        if self.broken {
            anyhow::bail!("database unreachable");
        }
        Ok(())
    }
}

fn loader() -> StaticPluginLoader {
    StaticPluginLoader::new()
        .with("weather", |_config: &PluginConfig| {
            Ok(Arc::new(ToolPlugin {
                tool: "forecast".to_string(),
                broken: false,
            }) as Arc<dyn Plugin>)
        })
        .with("broken", |_config: &PluginConfig| {
            Ok(Arc::new(ToolPlugin {
                tool: "crash".to_string(),
                broken: true,
            }) as Arc<dyn Plugin>)
        })
        .with("shadow", |_config: &PluginConfig| {
            Ok(Arc::new(ToolPlugin {
                tool: "echo".to_string(),
                broken: false,
            }) as Arc<dyn Plugin>)
        })
}

fn tool_names(manager: &PluginManager) -> Vec<String> {
    manager.all_tools().iter().map(|t| t.tool_info().name).collect()
}

#[tokio::test]
async fn test_failed_initialize_does_not_block_batch() {
    let manager = PluginManager::new(Arc::new(loader()));

    let results = manager
        .initialize(vec![PluginConfig::new("broken"), PluginConfig::new("weather")])
        .await;

    assert!(matches!(results[0], Err(PluginError::InitializationFailed { .. })));
    assert!(results[1].is_ok());

    assert_eq!(manager.get("broken").unwrap().state, PluginState::Error);
    assert!(manager.get("broken").unwrap().error.is_some());
    assert_eq!(manager.get("weather").unwrap().state, PluginState::Active);
    assert_eq!(tool_names(&manager), vec!["forecast".to_string()]);
}

#[tokio::test]
async fn test_disable_removes_tools_from_router() {
    let registry = Arc::new(CapabilityRegistry::with_loader(Arc::new(loader())));
    registry.plugins().load(PluginConfig::new("weather")).await.unwrap();
    let router = McpRouter::new(Arc::clone(&registry));

    let request = json!({
        "jsonrpc": "2.0", "id": 1, "method": "tools/call",
        "params": {"name": "forecast", "arguments": {}}
    });
    let ok = router.handle_value(request.clone()).await.unwrap();
    assert_eq!(ok["result"]["content"][0]["text"], json!("forecast ran"));

    registry.plugins().set_enabled("weather", false).await.unwrap();
    assert!(registry.list_tools().is_empty());

    let gone = router.handle_value(request).await.unwrap();
    assert_eq!(gone["error"]["code"], json!(error_codes::UNKNOWN_TOOL));

    registry.plugins().set_enabled("weather", true).await.unwrap();
    assert_eq!(registry.list_tools().len(), 1);
}

#[tokio::test]
async fn test_plugin_cannot_shadow_builtin() {
    let registry = Arc::new(CapabilityRegistry::with_loader(Arc::new(loader())));
    registry.register_tool(Arc::new(EchoTool)).unwrap();

    let err = registry.plugins().load(PluginConfig::new("shadow")).await.unwrap_err();
    assert!(matches!(err, PluginError::Conflict { .. }));
    assert_eq!(registry.plugins().get("shadow").unwrap().state, PluginState::Error);
    assert_eq!(registry.tool_count(), 1);
}

#[tokio::test]
async fn test_server_info_lists_plugins() {
    let registry = Arc::new(CapabilityRegistry::with_loader(Arc::new(loader())));
    registry
        .plugins()
        .initialize(vec![PluginConfig::new("weather"), PluginConfig::new("broken")])
        .await;
    let router = McpRouter::new(registry);

    let info = router
        .handle_value(json!({"jsonrpc": "2.0", "id": "i", "method": "server/info"}))
        .await
        .unwrap();
    let plugins = info["result"]["plugins"].as_array().unwrap();
    assert_eq!(plugins.len(), 2);
    assert_eq!(info["result"]["tools"], json!(1));
    assert!(plugins
        .iter()
        .any(|p| p["name"] == json!("broken") && p["state"] == json!("error")));
}
