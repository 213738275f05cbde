//! Built-in tools and resources
//!
//! Thin I/O wrappers. File tools never reach outside the configured root.

use anyhow::{bail, Context};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::process::Command;

use crate::protocol::{ResourceHandler, ToolHandler};
use crate::registry::{CapabilityRegistry, RegistryError};
use crate::types::{ResourceInfo, ResourceReadResponse, ServerInfo, ToolCallResponse, ToolInfo, MCP_VERSION};

/// URI of the built-in server description resource
pub const SERVER_INFO_URI: &str = "skein://server/info";

const MAX_SEARCH_RESULTS: usize = 1000;

/// Settings for the built-in tool set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuiltinConfig {
    /// File tools are confined to this directory
    pub root: PathBuf,
    pub max_read_bytes: u64,
    /// `execute_command` is only registered when this is set
    pub allow_commands: bool,
    /// Empty means any command
    pub allowed_commands: Vec<String>,
    pub command_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub max_fetch_bytes: usize,
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            max_read_bytes: 1024 * 1024,
            allow_commands: false,
            allowed_commands: Vec::new(),
            command_timeout_ms: 30_000,
            http_timeout_ms: 30_000,
            max_fetch_bytes: 256 * 1024,
        }
    }
}

/// Register every built-in tool and resource
///
/// `server` is reported by the `skein://server/info` resource.
pub fn register_builtins(
    registry: &Arc<CapabilityRegistry>,
    config: &BuiltinConfig,
    server: ServerInfo,
) -> Result<(), RegistryError> {
    let sandbox = Arc::new(Sandbox::new(&config.root));

    registry.register_tool(Arc::new(EchoTool))?;
    registry.register_tool(Arc::new(ReadFileTool {
        sandbox: Arc::clone(&sandbox),
        max_bytes: config.max_read_bytes,
    }))?;
    registry.register_tool(Arc::new(WriteFileTool {
        sandbox: Arc::clone(&sandbox),
    }))?;
    registry.register_tool(Arc::new(ListDirectoryTool {
        sandbox: Arc::clone(&sandbox),
    }))?;
    registry.register_tool(Arc::new(DeleteFileTool {
        sandbox: Arc::clone(&sandbox),
    }))?;
    registry.register_tool(Arc::new(SearchFilesTool {
        sandbox: Arc::clone(&sandbox),
    }))?;
    if config.allow_commands {
        registry.register_tool(Arc::new(ExecuteCommandTool {
            sandbox: Arc::clone(&sandbox),
            allowed: config.allowed_commands.clone(),
            timeout: Duration::from_millis(config.command_timeout_ms),
        }))?;
    }
    registry.register_tool(Arc::new(HttpFetchTool::new(
        Duration::from_millis(config.http_timeout_ms),
        config.max_fetch_bytes,
    )))?;

    registry.register_resource(Arc::new(ServerInfoResource {
        registry: Arc::downgrade(registry),
        server,
    }))?;
    Ok(())
}

/// Root-confined path resolution
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| normalize(root));
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied path, rejecting anything outside the root
    pub fn resolve(&self, requested: &str) -> anyhow::Result<PathBuf> {
        let requested = Path::new(requested);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        };
        let resolved = resolve_links(&normalize(&joined))?;
        if !resolved.starts_with(&self.root) {
            bail!("path is outside the allowed directory");
        }
        Ok(resolved)
    }

    fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }
}

/// Canonicalize the deepest existing ancestor and re-append the rest
fn resolve_links(path: &Path) -> anyhow::Result<PathBuf> {
    for ancestor in path.ancestors() {
        let Ok(real) = std::fs::canonicalize(ancestor) else {
            continue;
        };
        let rest = path.strip_prefix(ancestor).unwrap_or(Path::new(""));
        // A dangling link here would be followed on create.
        if let Some(first) = rest.components().next() {
            if std::fs::symlink_metadata(real.join(first)).is_ok() {
                bail!("path goes through a broken symbolic link");
            }
        }
        return Ok(real.join(rest));
    }
    Ok(path.to_path_buf())
}

/// Lexically resolve `.` and `..`
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn str_arg<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .with_context(|| format!("'{}' must be a string", key))
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Echo tool
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "echo".to_string(),
            description: "Echo back the provided message".to_string(),
            input_schema: object_schema(
                json!({"message": {"type": "string", "description": "Message to echo"}}),
                &["message"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        let message = str_arg(&arguments, "message")?;
        Ok(ToolCallResponse::text(format!("Echo: {}", message)))
    }
}

struct ReadFileTool {
    sandbox: Arc<Sandbox>,
    max_bytes: u64,
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "read_file".to_string(),
            description: "Read a UTF-8 text file".to_string(),
            input_schema: object_schema(json!({"path": {"type": "string"}}), &["path"]),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        let path = self.sandbox.resolve(str_arg(&arguments, "path")?)?;
        let metadata = tokio::fs::metadata(&path).await.context("file not found")?;
        if !metadata.is_file() {
            bail!("not a regular file");
        }
        if metadata.len() > self.max_bytes {
            bail!("file is {} bytes, limit is {}", metadata.len(), self.max_bytes);
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .context("failed to read file")?;
        Ok(ToolCallResponse::text(text))
    }
}

struct WriteFileTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "write_file".to_string(),
            description: "Write text to a file, creating parent directories".to_string(),
            input_schema: object_schema(
                json!({
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                    "append": {"type": "boolean", "default": false}
                }),
                &["path", "content"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        use tokio::io::AsyncWriteExt;

        let path = self.sandbox.resolve(str_arg(&arguments, "path")?)?;
        let content = str_arg(&arguments, "content")?;
        let append = arguments.get("append").and_then(Value::as_bool).unwrap_or(false);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create parent directory")?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .context("failed to open file")?;
        file.write_all(content.as_bytes()).await.context("failed to write file")?;
        file.flush().await?;

        Ok(ToolCallResponse::text(format!(
            "Wrote {} bytes to {}",
            content.len(),
            self.sandbox.display(&path)
        )))
    }
}

struct ListDirectoryTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl ToolHandler for ListDirectoryTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "list_directory".to_string(),
            description: "List the entries of a directory".to_string(),
            input_schema: object_schema(json!({"path": {"type": "string", "default": "."}}), &[]),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        let requested = arguments.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = self.sandbox.resolve(requested)?;
        let mut dir = tokio::fs::read_dir(&path).await.context("failed to open directory")?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            let kind = if metadata.is_dir() { "directory" } else { "file" };
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "type": kind,
                "size": metadata.len(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(ToolCallResponse::json(&json!({ "entries": entries })))
    }
}

struct DeleteFileTool {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl ToolHandler for DeleteFileTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "delete_file".to_string(),
            description: "Delete a file, or a directory when recursive is set".to_string(),
            input_schema: object_schema(
                json!({
                    "path": {"type": "string"},
                    "recursive": {"type": "boolean", "default": false}
                }),
                &["path"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        let path = self.sandbox.resolve(str_arg(&arguments, "path")?)?;
        if path == self.sandbox.root() {
            bail!("refusing to delete the root directory");
        }
        let recursive = arguments.get("recursive").and_then(Value::as_bool).unwrap_or(false);
        let metadata = tokio::fs::metadata(&path).await.context("file not found")?;
        if metadata.is_dir() {
            if !recursive {
                bail!("path is a directory; set recursive to delete it");
            }
            tokio::fs::remove_dir_all(&path).await.context("failed to delete directory")?;
        } else {
            tokio::fs::remove_file(&path).await.context("failed to delete file")?;
        }
        Ok(ToolCallResponse::text(format!("Deleted {}", self.sandbox.display(&path))))
    }
}

struct SearchFilesTool {
    sandbox: Arc<Sandbox>,
}

/// Translate a `*`/`?` glob into an anchored regex
fn glob_to_regex(pattern: &str) -> anyhow::Result<Regex> {
    let mut expr = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).context("invalid search pattern")
}

#[async_trait]
impl ToolHandler for SearchFilesTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "search_files".to_string(),
            description: "Recursively find files whose name matches a glob pattern".to_string(),
            input_schema: object_schema(
                json!({
                    "pattern": {"type": "string", "description": "Glob such as *.rs"},
                    "path": {"type": "string", "default": "."}
                }),
                &["pattern"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        let matcher = glob_to_regex(str_arg(&arguments, "pattern")?)?;
        let start = self
            .sandbox
            .resolve(arguments.get("path").and_then(Value::as_str).unwrap_or("."))?;

        let mut matches = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if matcher.is_match(&entry.file_name().to_string_lossy()) {
                    matches.push(self.sandbox.display(&entry.path()));
                    if matches.len() >= MAX_SEARCH_RESULTS {
                        break;
                    }
                }
            }
            if matches.len() >= MAX_SEARCH_RESULTS {
                break;
            }
        }
        matches.sort();
        Ok(ToolCallResponse::json(&json!({ "matches": matches })))
    }
}

struct ExecuteCommandTool {
    sandbox: Arc<Sandbox>,
    allowed: Vec<String>,
    timeout: Duration,
}

#[async_trait]
impl ToolHandler for ExecuteCommandTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "execute_command".to_string(),
            description: "Run a command in the root directory".to_string(),
            input_schema: object_schema(
                json!({
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}, "default": []}
                }),
                &["command"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        let command = str_arg(&arguments, "command")?;
        if !self.allowed.is_empty() && !self.allowed.iter().any(|c| c == command) {
            bail!("command '{}' is not allowed", command);
        }
        let args: Vec<String> = match arguments.get("args") {
            Some(value) => serde_json::from_value(value.clone()).context("'args' must be a list of strings")?,
            None => Vec::new(),
        };

        let output = Command::new(command)
            .args(&args)
            .current_dir(self.sandbox.root())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| anyhow::anyhow!("command timed out after {:?}", self.timeout))?
            .context("failed to run command")?;

        let result = json!({
            "exit_code": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        });
        let mut response = ToolCallResponse::json(&result);
        if !output.status.success() {
            response.is_error = Some(true);
        }
        Ok(response)
    }
}

struct HttpFetchTool {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetchTool {
    fn new(timeout: Duration, max_bytes: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, max_bytes }
    }
}

#[async_trait]
impl ToolHandler for HttpFetchTool {
    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            name: "http_fetch".to_string(),
            description: "Fetch a URL over HTTP".to_string(),
            input_schema: object_schema(
                json!({
                    "url": {"type": "string"},
                    "method": {"type": "string", "enum": ["GET", "POST"], "default": "GET"},
                    "body": {"type": "string"}
                }),
                &["url"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolCallResponse> {
        let url = url::Url::parse(str_arg(&arguments, "url")?).context("invalid URL")?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("only http and https URLs are supported");
        }
        let method = arguments.get("method").and_then(Value::as_str).unwrap_or("GET");
        let request = match method {
            "GET" => self.client.get(url),
            "POST" => {
                let body = arguments.get("body").and_then(Value::as_str).unwrap_or_default().to_string();
                self.client.post(url).body(body)
            }
            other => bail!("unsupported method '{}'", other),
        };

        let mut response = request.send().await.context("request failed")?;
        let status = response.status();
        let mut bytes = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.context("failed to read response body")? {
            let room = self.max_bytes - bytes.len();
            if chunk.len() > room {
                bytes.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        let mut result = ToolCallResponse::json(&json!({
            "status": status.as_u16(),
            "body": body,
            "truncated": truncated,
        }));
        if !status.is_success() {
            result.is_error = Some(true);
        }
        Ok(result)
    }
}

/// `skein://server/info`
struct ServerInfoResource {
    registry: Weak<CapabilityRegistry>,
    server: ServerInfo,
}

#[async_trait]
impl ResourceHandler for ServerInfoResource {
    fn resource_info(&self) -> ResourceInfo {
        ResourceInfo {
            uri: SERVER_INFO_URI.to_string(),
            name: "Server information".to_string(),
            description: Some("Server name, version and capability counts".to_string()),
            mime_type: Some("application/json".to_string()),
        }
    }

    async fn read(&self, uri: &str) -> anyhow::Result<ResourceReadResponse> {
        let registry = self.registry.upgrade().context("server is shutting down")?;
        let body = json!({
            "name": self.server.name,
            "version": self.server.version,
            "protocolVersion": MCP_VERSION,
            "tools": registry.tool_count(),
            "resources": registry.resource_count(),
            "plugins": registry.plugins().active_count(),
        });
        Ok(ResourceReadResponse::text(
            uri,
            Some("application/json"),
            serde_json::to_string_pretty(&body)?,
        ))
    }
}
