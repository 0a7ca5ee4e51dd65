//! Server lifecycle management.
//!
//! Connects to each configured tool server (spawning a child process for
//! `command` entries), runs the MCP handshake, and shuts servers down.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::errors::McpError;
use super::transport::{extract_result, HttpTransport, StdioTransport, Transport};
use super::types::{
    InitializeResult, McpPrompt, McpResource, McpToolDefinition, ServerConfig, ServerInfo,
    PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake including the list calls.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Stop following `nextCursor` after this many pages.
const MAX_LIST_PAGES: usize = 50;

// ─── ManagedServer ───────────────────────────────────────────────────────────

/// A connected tool server with everything it advertised at startup.
pub struct ManagedServer {
    pub name: String,
    /// Child process handle (`None` for HTTP servers).
    process: Option<Child>,
    pub transport: Transport,
    pub server_info: Option<ServerInfo>,
    pub tools: Vec<McpToolDefinition>,
    pub resources: Vec<McpResource>,
    pub prompts: Vec<McpPrompt>,
}

impl ManagedServer {
    /// Run the handshake over an already-open transport.
    pub async fn connect(
        name: &str,
        transport: Transport,
        process: Option<Child>,
    ) -> Result<Self, McpError> {
        let mut server = Self {
            name: name.to_string(),
            process,
            transport,
            server_info: None,
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
        };

        match tokio::time::timeout(INIT_TIMEOUT, server.initialize()).await {
            Ok(Ok(())) => Ok(server),
            Ok(Err(e)) => {
                server.kill().await;
                Err(McpError::InitFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                server.kill().await;
                Err(McpError::InitFailed {
                    name: name.to_string(),
                    reason: format!("initialization timed out after {}s", INIT_TIMEOUT.as_secs()),
                })
            }
        }
    }

    /// `initialize` → `notifications/initialized` → list whatever the server advertises.
    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result = extract_result(self.transport.request("initialize", Some(params)).await?)?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                name: self.name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        self.transport.notify("notifications/initialized", None).await?;

        if init.capabilities.tools.is_some() {
            self.tools = self.list_all("tools/list", "tools").await?;
        }
        if init.capabilities.resources.is_some() {
            self.resources = self.list_all("resources/list", "resources").await?;
        }
        if init.capabilities.prompts.is_some() {
            self.prompts = self.list_all("prompts/list", "prompts").await?;
        }

        tracing::info!(
            server = %self.name,
            protocol = init.protocol_version.as_deref().unwrap_or("unknown"),
            tools = self.tools.len(),
            resources = self.resources.len(),
            prompts = self.prompts.len(),
            "tool server initialized"
        );
        self.server_info = init.server_info;
        Ok(())
    }

    /// Collect every page of a `*/list` call.
    async fn list_all<T: DeserializeOwned>(
        &self,
        method: &str,
        key: &str,
    ) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let mut page = extract_result(self.transport.request(method, params).await?)?;

            let entries = page.get_mut(key).map(serde_json::Value::take).unwrap_or_default();
            if !entries.is_null() {
                let parsed: Vec<T> =
                    serde_json::from_value(entries).map_err(|e| McpError::InitFailed {
                        name: self.name.clone(),
                        reason: format!("malformed {method} response: {e}"),
                    })?;
                items.extend(parsed);
            }

            cursor = page
                .get("nextCursor")
                .and_then(|c| c.as_str())
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(items);
            }
        }

        tracing::warn!(server = %self.name, method, "listing truncated after {MAX_LIST_PAGES} pages");
        Ok(items)
    }

    /// Check if the server process is still running. HTTP servers always report alive.
    pub fn is_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Close the connection, wait for the process to exit, kill it if it does not.
    pub async fn shutdown(&mut self) {
        self.transport.close().await;

        if let Some(child) = self.process.as_mut() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.name, %status, "tool server exited");
                }
                _ => {
                    tracing::warn!(server = %self.name, "tool server did not exit, killing");
                    let _ = child.kill().await;
                }
            }
        }
    }

    async fn kill(&mut self) {
        if let Some(child) = self.process.as_mut() {
            let _ = child.kill().await;
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Connect to one configured server and perform the handshake.
pub async fn spawn_server(
    name: &str,
    config: &ServerConfig,
    working_dir: Option<&str>,
) -> Result<ManagedServer, McpError> {
    match (&config.command, &config.url) {
        (Some(command), _) => spawn_stdio_server(name, command, config, working_dir).await,
        (None, Some(url)) => {
            let transport = HttpTransport::new(name, url, &config.headers)?;
            ManagedServer::connect(name, Transport::Http(transport), None).await
        }
        (None, None) => Err(McpError::ConfigError {
            reason: format!("server '{name}' has neither 'command' nor 'url'"),
        }),
    }
}

async fn spawn_stdio_server(
    name: &str,
    command: &str,
    config: &ServerConfig,
    working_dir: Option<&str>,
) -> Result<ManagedServer, McpError> {
    let mut cmd = Command::new(command);
    cmd.args(&config.args);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    // Per-server cwd overrides the global working_dir
    if let Some(dir) = config.cwd.as_deref().or(working_dir) {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{command}: {e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;
    let stderr = child.stderr.take();

    let transport = Transport::Stdio(StdioTransport::new(name, stdin, stdout));
    match ManagedServer::connect(name, transport, Some(child)).await {
        Ok(server) => {
            if let Some(stderr) = stderr {
                tokio::spawn(forward_stderr(name.to_string(), stderr));
            }
            Ok(server)
        }
        Err(McpError::InitFailed { name, reason }) => {
            let stderr_ctx = read_stderr_on_failure(stderr).await;
            if !stderr_ctx.is_empty() {
                tracing::warn!(server = %name, stderr = %stderr_ctx, "server stderr captured on failure");
            }
            Err(McpError::InitFailed {
                reason: format!("{reason}{}", format_stderr_suffix(&stderr_ctx)),
                name,
            })
        }
        Err(e) => Err(e),
    }
}

/// Relay a running server's stderr into the log.
async fn forward_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %name, "{line}");
    }
}

/// Read whatever a failed server printed to stderr, capped at 2000 chars.
async fn read_stderr_on_failure(stderr_handle: Option<ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(Duration::from_millis(500), stderr.read_to_string(&mut buf)).await {
        Ok(Ok(_)) => {
            if buf.len() > 2000 {
                let cut = (0..=2000).rev().find(|&i| buf.is_char_boundary(i)).unwrap_or(0);
                buf.truncate(cut);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Batch Operations ────────────────────────────────────────────────────────

/// Start every enabled server concurrently.
///
/// Servers that fail to start are returned alongside the ones that did;
/// partial startup is acceptable.
pub async fn spawn_all_servers(
    configs: &HashMap<String, ServerConfig>,
    working_dir: Option<&str>,
) -> (HashMap<String, ManagedServer>, Vec<(String, McpError)>) {
    let mut servers = HashMap::new();
    let mut errors = Vec::new();

    let mut handles = Vec::new();
    for (name, config) in configs {
        if config.disabled {
            tracing::info!(server = %name, "tool server disabled, skipping");
            continue;
        }
        let name = name.clone();
        let config = config.clone();
        let wd = working_dir.map(str::to_string);
        handles.push((
            name.clone(),
            tokio::spawn(async move { spawn_server(&name, &config, wd.as_deref()).await }),
        ));
    }

    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(server)) => {
                servers.insert(name, server);
            }
            Ok(Err(e)) => errors.push((name, e)),
            Err(e) => {
                errors.push((
                    name.clone(),
                    McpError::SpawnFailed {
                        name,
                        reason: format!("join error: {e}"),
                    },
                ));
            }
        }
    }

    (servers, errors)
}

/// Shut down all managed servers.
pub async fn shutdown_all_servers(servers: &mut HashMap<String, ManagedServer>) {
    for server in servers.values_mut() {
        server.shutdown().await;
    }
    servers.clear();
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::test_support::fake_server;

    #[tokio::test]
    async fn test_handshake_sequence_and_discovery() {
        let (transport, seen) = fake_server("notes");
        let server = ManagedServer::connect("notes", Transport::Stdio(transport), None)
            .await
            .unwrap();

        assert_eq!(server.tools.len(), 4);
        assert_eq!(server.resources[0].uri, "file:///notes.txt");
        assert_eq!(server.prompts[0].name, "summarize");
        assert_eq!(
            server.server_info.as_ref().and_then(|i| i.name.as_deref()),
            Some("notes")
        );

        let methods = seen.lock().unwrap().clone();
        assert_eq!(
            methods,
            vec![
                "initialize",
                "notifications/initialized",
                "tools/list",
                "resources/list",
                "prompts/list",
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_server_without_endpoint_is_config_error() {
        let err = spawn_server("empty", &ServerConfig::default(), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let config = ServerConfig {
            command: Some("definitely-not-a-real-binary-7f3a".into()),
            ..Default::default()
        };
        let err = spawn_server("ghost", &config, None).await.err().unwrap();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_spawn_all_skips_disabled_and_collects_failures() {
        let mut configs = HashMap::new();
        configs.insert(
            "off".to_string(),
            ServerConfig {
                command: Some("definitely-not-a-real-binary-7f3a".into()),
                disabled: true,
                ..Default::default()
            },
        );
        configs.insert(
            "broken".to_string(),
            ServerConfig {
                command: Some("definitely-not-a-real-binary-7f3a".into()),
                ..Default::default()
            },
        );

        let (servers, errors) = spawn_all_servers(&configs, None).await;
        assert!(servers.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "broken");
    }

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix("boom\n"), " | stderr: boom");
    }
}
