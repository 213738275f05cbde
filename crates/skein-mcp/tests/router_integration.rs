//! End-to-end routing tests against a registry with built-in tools

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::tempdir;

use skein_mcp::builtin::{register_builtins, BuiltinConfig, EchoTool};
use skein_mcp::prelude::*;

fn echo_router() -> McpRouter {
    let registry = Arc::new(CapabilityRegistry::default());
    registry.register_tool(Arc::new(EchoTool)).unwrap();
    McpRouter::new(registry)
}

async fn call(router: &McpRouter, request: Value) -> Value {
    router.handle_value(request).await.expect("request must produce a response")
}

struct Panicky;

#[async_trait]
impl ToolHandler for Panicky {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "explode".to_string(),
            description: "always panics".to_string(),
            input_schema: json!({"type": "object"}),
        }
    }

    async fn execute(&self, _arguments: Value) -> anyhow::Result<ToolCallResponse> {
        panic!("boom at /srv/secret/state.db");
    }
}

struct Failing;

#[async_trait]
impl ToolHandler for Failing {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "fail".to_string(),
            description: "always errors".to_string(),
            input_schema: json!({"type": "object"}),
        }
    }

    async fn execute(&self, _arguments: Value) -> anyhow::Result<ToolCallResponse> {
        anyhow::bail!("cannot open /var/lib/skein/db.sqlite\nstack line 1\nstack line 2")
    }
}

struct Quota;

#[async_trait]
impl McpHandler for Quota {
    fn method_pattern(&self) -> &str {
        "quota/*"
    }

    async fn handle_request(&self, method: &str, _params: Option<Value>) -> McpResult<Value> {
        match method {
            "quota/get" => Ok(json!({"remaining": 3})),
            _ => Err(McpError::new(-32050, "quota exceeded").with_data(json!({"retry_after": 30}))),
        }
    }
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn test_tools_list_with_echo() {
        let router = echo_router();
        let response = call(&router, json!({"jsonrpc": "2.0", "id": "1", "method": "tools/list"})).await;

        assert_eq!(response["id"], json!("1"));
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], json!("echo"));
    }

    #[tokio::test]
    async fn test_echo_call() {
        let router = echo_router();
        let response = call(
            &router,
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {"name": "echo", "arguments": {"message": "hi"}}
            }),
        )
        .await;

        assert!(response.get("error").is_none(), "unexpected error: {}", response);
        assert_eq!(response["result"]["content"][0]["text"], json!("Echo: hi"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let router = echo_router();
        let response = call(
            &router,
            json!({
                "jsonrpc": "2.0",
                "id": "3",
                "method": "tools/call",
                "params": {"name": "missing_tool", "arguments": {}}
            }),
        )
        .await;

        assert!(response.get("result").is_none());
        assert_eq!(response["error"]["code"], json!(error_codes::UNKNOWN_TOOL));
        assert!(response["error"]["message"].as_str().unwrap().contains("Unknown tool"));
    }
}

mod dispatch {
    use super::*;

    #[tokio::test]
    async fn test_initialize_and_ping() {
        let router = echo_router();
        let init = call(
            &router,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": MCP_VERSION}}),
        )
        .await;
        assert_eq!(init["result"]["protocolVersion"], json!(MCP_VERSION));
        assert_eq!(init["result"]["serverInfo"]["name"], json!("skein"));
        assert!(init["result"]["capabilities"]["tools"].is_object());

        let pong = call(&router, json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})).await;
        assert_eq!(pong["result"], json!({}));
    }

    #[tokio::test]
    async fn test_registered_handler_error_reaches_caller_unchanged() {
        let registry = Arc::new(CapabilityRegistry::default());
        registry.register_handler(Arc::new(Quota)).unwrap();
        let router = McpRouter::new(registry);

        let ok = call(&router, json!({"jsonrpc": "2.0", "id": 10, "method": "quota/get"})).await;
        assert_eq!(ok["result"], json!({"remaining": 3}));

        let failed = call(&router, json!({"jsonrpc": "2.0", "id": 11, "method": "quota/spend"})).await;
        assert_eq!(failed["error"]["code"], json!(-32050));
        assert_eq!(failed["error"]["message"], json!("quota exceeded"));
        assert_eq!(failed["error"]["data"], json!({"retry_after": 30}));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let router = echo_router();
        let response = call(&router, json!({"jsonrpc": "2.0", "id": 9, "method": "prompts/list"})).await;
        assert_eq!(response["error"]["code"], json!(error_codes::METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_schema_violation_is_invalid_params() {
        let router = echo_router();
        let response = call(
            &router,
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": {"name": "echo"}}),
        )
        .await;
        assert_eq!(response["error"]["code"], json!(error_codes::INVALID_PARAMS));
    }

    #[tokio::test]
    async fn test_missing_tool_name() {
        let router = echo_router();
        let response = call(
            &router,
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": {}}),
        )
        .await;
        assert_eq!(response["error"]["code"], json!(error_codes::INVALID_PARAMS));
        assert!(response["error"]["message"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn test_wrong_jsonrpc_version() {
        let router = echo_router();
        let response = call(&router, json!({"jsonrpc": "1.0", "id": 6, "method": "ping"})).await;
        assert_eq!(response["error"]["code"], json!(error_codes::INVALID_REQUEST));
        assert_eq!(response["id"], json!(6));
    }

    #[tokio::test]
    async fn test_panicking_tool_yields_internal_error() {
        let registry = Arc::new(CapabilityRegistry::default());
        registry.register_tool(Arc::new(Panicky)).unwrap();
        let router = McpRouter::new(registry);

        let response = call(
            &router,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call", "params": {"name": "explode"}}),
        )
        .await;
        assert_eq!(response["error"]["code"], json!(error_codes::INTERNAL_ERROR));
        assert_eq!(response["error"]["message"], json!("Internal server error"));
    }

    #[tokio::test]
    async fn test_tool_error_is_sanitized() {
        let registry = Arc::new(CapabilityRegistry::default());
        registry.register_tool(Arc::new(Failing)).unwrap();
        let router = McpRouter::new(registry);

        let response = call(
            &router,
            json!({"jsonrpc": "2.0", "id": 8, "method": "tools/call", "params": {"name": "fail"}}),
        )
        .await;
        assert_eq!(response["error"]["code"], json!(error_codes::TOOL_EXECUTION_ERROR));
        let message = response["error"]["message"].as_str().unwrap();
        assert!(!message.contains("/var/lib"), "path leaked: {}", message);
        assert!(!message.contains("stack line"), "extra lines leaked: {}", message);
        assert!(message.contains("<path>"));
    }
}

mod batches {
    use super::*;

    #[tokio::test]
    async fn test_batch_preserves_order_and_skips_notifications() {
        let router = echo_router();
        let response = call(
            &router,
            json!([
                {"jsonrpc": "2.0", "id": "b", "method": "ping"},
                {"jsonrpc": "2.0", "method": "notifications/initialized"},
                {"jsonrpc": "2.0", "id": "a", "method": "tools/list"}
            ]),
        )
        .await;

        let items = response.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], json!("b"));
        assert_eq!(items[1]["id"], json!("a"));
    }

    #[tokio::test]
    async fn test_notification_only_input_has_no_body() {
        let router = echo_router();
        assert!(router
            .handle_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
            .is_none());
        assert!(router
            .handle_value(json!([{"jsonrpc": "2.0", "method": "notifications/initialized"}]))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_empty_batch_is_invalid() {
        let router = echo_router();
        let response = call(&router, json!([])).await;
        assert_eq!(response["error"]["code"], json!(error_codes::INVALID_REQUEST));
    }
}

mod builtins {
    use super::*;

    #[tokio::test]
    async fn test_file_tools_and_server_info_resource() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(CapabilityRegistry::default());
        let config = BuiltinConfig {
            root: dir.path().to_path_buf(),
            ..BuiltinConfig::default()
        };
        register_builtins(&registry, &config, ServerInfo::default()).unwrap();
        let router = McpRouter::new(Arc::clone(&registry));

        let written = call(
            &router,
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": "write_file", "arguments": {"path": "notes/a.txt", "content": "hello"}}
            }),
        )
        .await;
        assert!(written.get("error").is_none(), "unexpected error: {}", written);

        let read = call(
            &router,
            json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "read_file", "arguments": {"path": "notes/a.txt"}}
            }),
        )
        .await;
        assert_eq!(read["result"]["content"][0]["text"], json!("hello"));

        let escaped = call(
            &router,
            json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {"name": "read_file", "arguments": {"path": "../../etc/passwd"}}
            }),
        )
        .await;
        assert_eq!(escaped["error"]["code"], json!(error_codes::TOOL_EXECUTION_ERROR));

        let info = call(
            &router,
            json!({
                "jsonrpc": "2.0", "id": 4, "method": "resources/read",
                "params": {"uri": "skein://server/info"}
            }),
        )
        .await;
        let text = info["result"]["contents"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["name"], json!("skein"));

        let missing = call(
            &router,
            json!({
                "jsonrpc": "2.0", "id": 5, "method": "resources/read",
                "params": {"uri": "nothing://here"}
            }),
        )
        .await;
        assert_eq!(missing["error"]["code"], json!(error_codes::RESOURCE_NOT_FOUND));
    }
}
