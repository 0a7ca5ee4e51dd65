//! MCP Client: high-level interface for tool execution.
//!
//! Owns the connected servers and the aggregated registry, and routes
//! tool calls, resource reads and prompt requests to the right server.
//! Built once at startup, then shared as `Arc<McpClient>`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::errors::{McpError, ToolError};
use super::handler::ProtocolHandler;
use super::lifecycle::{self, ManagedServer};
use super::registry::ToolRegistry;
use super::transport::extract_result;
use super::types::{
    McpPrompt, McpResource, McpServersConfig, ResourceContent, ServerConfig, ToolCallResult,
    ToolSpec,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for tool call execution (ms).
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Maximum characters of a tool result kept for the conversation.
pub const MAX_TOOL_RESULT_CHARS: usize = 6_000;

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Client for every configured tool server.
pub struct McpClient {
    servers: HashMap<String, ManagedServer>,
    configs: HashMap<String, ServerConfig>,
    registry: ToolRegistry,
    working_dir: Option<String>,
    call_timeout: Duration,
}

impl McpClient {
    pub fn new(config: McpServersConfig, working_dir: Option<String>) -> Self {
        Self {
            servers: HashMap::new(),
            configs: config.servers,
            registry: ToolRegistry::new(),
            working_dir,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }

    pub fn set_call_timeout(&mut self, timeout_ms: u64) {
        self.call_timeout = Duration::from_millis(timeout_ms);
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start all enabled servers and build the registry.
    ///
    /// Returns the servers that failed to start (partial startup is OK).
    pub async fn start_all(&mut self) -> Vec<(String, McpError)> {
        let (servers, errors) =
            lifecycle::spawn_all_servers(&self.configs, self.working_dir.as_deref()).await;

        for (_, server) in servers {
            self.attach(server);
        }
        for (name, e) in &errors {
            tracing::warn!(server = %name, error = %e, "tool server failed to start");
        }
        errors
    }

    /// Add an already-connected server and register what it advertised.
    pub fn attach(&mut self, server: ManagedServer) {
        let name = server.name.clone();
        self.registry.unregister_server(&name);
        self.registry
            .register_server_tools(&name, server.tools.clone());
        self.registry
            .register_server_resources(&name, server.resources.clone());
        self.registry
            .register_server_prompts(&name, server.prompts.clone());
        self.servers.insert(name, server);
    }

    /// Shut down all servers.
    pub async fn shutdown_all(&mut self) {
        lifecycle::shutdown_all_servers(&mut self.servers).await;
        self.registry = ToolRegistry::new();
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Execute a tool call, routing to the owning server.
    ///
    /// Steps:
    /// 1. Resolve the name (flat, or bare when unique) and check arguments
    /// 2. Send `tools/call` under the call timeout
    /// 3. Flatten the content items to text; `isError` becomes a failure
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ToolError> {
        let start = Instant::now();

        let (fq_name, tool) = self
            .registry
            .resolve_tool(tool_name)
            .ok_or_else(|| ToolError::NotFound {
                name: tool_name.to_string(),
            })?;

        ToolRegistry::validate_arguments(tool, &arguments)
            .map_err(|e| ToolError::execution_failed(fq_name, e))?;

        let server = self.server(&tool.server).map_err(|e| ToolError::execution_failed(fq_name, e))?;

        let params = serde_json::json!({
            "name": tool.definition.name,
            "arguments": arguments,
        });

        tracing::debug!(tool = %fq_name, server = %tool.server, "calling tool");
        let result = self
            .timed_request(server, "tools/call", params, fq_name)
            .await
            .map_err(|e| ToolError::execution_failed(fq_name, e))?;

        let elapsed = start.elapsed().as_millis() as u64;
        let content = flatten_content(&result);

        if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
            tracing::warn!(tool = %fq_name, elapsed_ms = elapsed, "tool reported an error");
            return Err(ToolError::execution_failed(
                fq_name,
                McpError::ToolReportedError {
                    tool: tool.definition.name.clone(),
                    message: content,
                },
            ));
        }

        tracing::info!(tool = %fq_name, elapsed_ms = elapsed, result_len = content.len(), "tool call completed");
        Ok(ToolCallResult {
            tool_name: fq_name.to_string(),
            content: truncate_tool_result(&content, fq_name),
            raw: result,
            execution_time_ms: elapsed,
        })
    }

    /// Read a resource from the server that advertises it.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContent>, ToolError> {
        let server_name = self
            .registry
            .server_for_resource(uri)
            .ok_or_else(|| ToolError::NotFound {
                name: uri.to_string(),
            })?;
        let server = self.server(server_name).map_err(|e| ToolError::execution_failed(uri, e))?;

        let result = self
            .timed_request(server, "resources/read", serde_json::json!({ "uri": uri }), uri)
            .await
            .map_err(|e| ToolError::execution_failed(uri, e))?;

        let contents = result
            .get("contents")
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));
        serde_json::from_value(contents).map_err(|e| {
            ToolError::execution_failed(
                uri,
                McpError::TransportError {
                    server: server_name.to_string(),
                    reason: format!("malformed resources/read result: {e}"),
                },
            )
        })
    }

    /// Render a prompt template. Returns the prompt messages' text joined by newlines.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<String, ToolError> {
        let (server_name, prompt) = self.registry.resolve_prompt(name).ok_or_else(|| {
            ToolError::NotFound {
                name: name.to_string(),
            }
        })?;

        if let Some(missing) = prompt
            .arguments
            .iter()
            .find(|a| a.required && !arguments.contains_key(&a.name))
        {
            return Err(ToolError::execution_failed(
                name,
                McpError::InvalidArguments {
                    tool: prompt.name.clone(),
                    reason: format!("missing required argument: '{}'", missing.name),
                },
            ));
        }

        let server = self.server(server_name).map_err(|e| ToolError::execution_failed(name, e))?;
        let params = serde_json::json!({ "name": prompt.name, "arguments": arguments });
        let result = self
            .timed_request(server, "prompts/get", params, name)
            .await
            .map_err(|e| ToolError::execution_failed(name, e))?;

        let text = result
            .get("messages")
            .and_then(|m| m.as_array())
            .map(|messages| {
                messages
                    .iter()
                    .map(|m| content_item_text(&m["content"]))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok(text)
    }

    fn server(&self, name: &str) -> Result<&ManagedServer, McpError> {
        self.servers.get(name).ok_or_else(|| McpError::ServerUnavailable {
            name: name.to_string(),
            reason: "server not running".into(),
        })
    }

    async fn timed_request(
        &self,
        server: &ManagedServer,
        method: &str,
        params: serde_json::Value,
        target: &str,
    ) -> Result<serde_json::Value, McpError> {
        let response = tokio::time::timeout(
            self.call_timeout,
            server.transport.request(method, Some(params)),
        )
        .await
        .map_err(|_| McpError::Timeout {
            tool: target.to_string(),
            timeout_ms: self.call_timeout.as_millis() as u64,
        })?
        .map_err(|e| match e {
            McpError::TransportError { reason, .. } => McpError::ServerUnavailable {
                name: server.name.clone(),
                reason,
            },
            other => other,
        })?;

        extract_result(response)
    }

    // ─── Status ──────────────────────────────────────────────────────────

    pub fn running_server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn tool_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_server_running(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    /// Names of all configured servers (including those that failed to start).
    pub fn configured_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn resources(&self) -> Vec<&McpResource> {
        self.registry.resources()
    }

    /// `(flat name, prompt)` pairs.
    pub fn prompts(&self) -> Vec<(&str, &McpPrompt)> {
        self.registry.prompts()
    }
}

#[async_trait]
impl ProtocolHandler for McpClient {
    fn tools(&self) -> Vec<ToolSpec> {
        self.registry.tool_specs()
    }

    async fn use_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ToolError> {
        self.call_tool(name, arguments).await
    }

    async fn access_resource(&self, uri: &str) -> Result<Vec<ResourceContent>, ToolError> {
        self.read_resource(uri).await
    }
}

// ─── Result Helpers ──────────────────────────────────────────────────────────

/// Join a `tools/call` result's content items into one string.
///
/// Text items contribute their text; anything else (images, embedded
/// resources) is kept as compact JSON. Falls back to `structuredContent`.
pub fn flatten_content(result: &serde_json::Value) -> String {
    match result.get("content").and_then(|c| c.as_array()) {
        Some(items) if !items.is_empty() => items
            .iter()
            .map(content_item_text)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => result
            .get("structuredContent")
            .map(|s| s.to_string())
            .unwrap_or_default(),
    }
}

fn content_item_text(item: &serde_json::Value) -> String {
    match (item.get("type").and_then(|t| t.as_str()), item.get("text")) {
        (Some("text"), Some(serde_json::Value::String(text))) => text.clone(),
        _ => item.to_string(),
    }
}

/// Cap a tool result at `MAX_TOOL_RESULT_CHARS` characters.
fn truncate_tool_result(result: &str, tool_name: &str) -> String {
    let total = result.chars().count();
    if total <= MAX_TOOL_RESULT_CHARS {
        return result.to_string();
    }

    let truncated: String = result.chars().take(MAX_TOOL_RESULT_CHARS).collect();
    tracing::warn!(
        tool = %tool_name,
        original_len = total,
        truncated_to = MAX_TOOL_RESULT_CHARS,
        "tool result truncated"
    );
    format!("{truncated}\n\n[... truncated: showing first {MAX_TOOL_RESULT_CHARS} of {total} chars]")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::test_support::fake_server;
    use crate::mcp_client::transport::Transport;
    use std::sync::Arc;

    async fn client_with_fake(names: &[&str]) -> McpClient {
        let mut client = McpClient::new(McpServersConfig::default(), None);
        for name in names {
            let (transport, _) = fake_server(name);
            let server = ManagedServer::connect(name, Transport::Stdio(transport), None)
                .await
                .unwrap();
            client.attach(server);
        }
        client
    }

    #[test]
    fn test_new_client_empty() {
        let client = McpClient::new(McpServersConfig::default(), None);
        assert_eq!(client.running_server_count(), 0);
        assert_eq!(client.tool_count(), 0);
        assert!(client.tools().is_empty());
    }

    #[test]
    fn test_configured_servers_sorted() {
        let mut servers = HashMap::new();
        servers.insert("zeta".to_string(), ServerConfig::default());
        servers.insert("alpha".to_string(), ServerConfig::default());
        let client = McpClient::new(McpServersConfig { servers }, None);
        assert_eq!(client.configured_servers(), vec!["alpha", "zeta"]);
        assert!(!client.is_server_running("alpha"));
    }

    #[test]
    fn test_flatten_content() {
        let result = serde_json::json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "text", "text": "line two"}
            ]
        });
        let flat = flatten_content(&result);
        assert!(flat.starts_with("line one\n{"));
        assert!(flat.ends_with("\nline two"));

        let structured = serde_json::json!({"content": [], "structuredContent": {"n": 1}});
        assert_eq!(flatten_content(&structured), r#"{"n":1}"#);
    }

    #[test]
    fn test_truncate_tool_result_respects_char_boundaries() {
        let short = "hello";
        assert_eq!(truncate_tool_result(short, "t"), "hello");

        let long = "é".repeat(MAX_TOOL_RESULT_CHARS + 10);
        let out = truncate_tool_result(&long, "t");
        assert!(out.starts_with(&"é".repeat(MAX_TOOL_RESULT_CHARS)));
        assert!(out.contains(&format!("of {} chars", MAX_TOOL_RESULT_CHARS + 10)));
    }

    #[tokio::test]
    async fn test_use_tool_routes_by_flat_and_bare_name() {
        let client = client_with_fake(&["notes"]).await;
        assert_eq!(client.tool_count(), 4);

        let result = client
            .use_tool("notes__echo", serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(result.content, "hello");
        assert_eq!(result.tool_name, "notes__echo");

        let bare = client
            .use_tool("echo", serde_json::json!({"text": "again"}))
            .await
            .unwrap();
        assert_eq!(bare.content, "again");
    }

    #[tokio::test]
    async fn test_use_tool_unknown_is_not_found() {
        let client = client_with_fake(&["notes"]).await;
        let err = client
            .use_tool("notes__teleport", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_use_tool_is_error_becomes_execution_failed() {
        let client = client_with_fake(&["notes"]).await;
        let err = client
            .use_tool("notes__fail", serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            ToolError::ExecutionFailed {
                cause: McpError::ToolReportedError { message, .. },
                ..
            } => assert_eq!(message, "disk on fire"),
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_use_tool_missing_required_argument() {
        let client = client_with_fake(&["notes"]).await;
        let err = client
            .use_tool("notes__echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::ExecutionFailed {
                cause: McpError::InvalidArguments { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_use_tool_times_out() {
        let mut client = client_with_fake(&["notes"]).await;
        client.set_call_timeout(50);
        let err = client
            .use_tool("notes__slow", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::ExecutionFailed {
                cause: McpError::Timeout { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_large_result_is_truncated() {
        let client = client_with_fake(&["notes"]).await;
        let result = client
            .use_tool("notes__big", serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.content.contains("[... truncated: showing first 6000 of 10000 chars]"));
    }

    #[tokio::test]
    async fn test_bare_name_ambiguous_across_servers() {
        let client = client_with_fake(&["a", "b"]).await;
        assert!(matches!(
            client.use_tool("echo", serde_json::json!({"text": "x"})).await,
            Err(ToolError::NotFound { .. })
        ));
        let ok = client
            .use_tool("b__echo", serde_json::json!({"text": "x"}))
            .await
            .unwrap();
        assert_eq!(ok.content, "x");
    }

    #[tokio::test]
    async fn test_access_resource_and_prompt() {
        let client = client_with_fake(&["notes"]).await;
        let contents = client.access_resource("file:///notes.txt").await.unwrap();
        assert_eq!(contents[0].text.as_deref(), Some("remember the milk"));

        let mut args = HashMap::new();
        args.insert("topic".to_string(), "rust".to_string());
        let prompt = client.get_prompt("notes__summarize", args).await.unwrap();
        assert_eq!(prompt, "Summarize rust");

        let err = client.get_prompt("summarize", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_connection() {
        let client = Arc::new(client_with_fake(&["notes"]).await);
        let mut handles = Vec::new();
        for i in 0..16 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let text = format!("msg-{i}");
                let result = client
                    .use_tool("notes__echo", serde_json::json!({ "text": text }))
                    .await
                    .unwrap();
                assert_eq!(result.content, text);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
