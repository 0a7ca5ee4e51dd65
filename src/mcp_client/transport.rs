//! JSON-RPC transports.
//!
//! Two ways of reaching a tool server:
//! - `StdioTransport`: line-delimited JSON over a child process's stdin/stdout
//!   (or any async byte pipe)
//! - `HttpTransport`: one POST per message, answered with either a JSON body
//!   or a `text/event-stream` body
//!
//! Each transport serializes its exchanges: a request holds the connection
//! lock from write until the matching response has been read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{error_codes, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Session header used by streamable-HTTP servers.
const SESSION_HEADER: &str = "mcp-session-id";

/// Upper bound for a single HTTP exchange.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

// ─── Transport ───────────────────────────────────────────────────────────────

/// Connection to one tool server.
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl Transport {
    /// Send a request and wait for the response with the same id.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        match self {
            Transport::Stdio(t) => t.request(method, params).await,
            Transport::Http(t) => t.request(method, params).await,
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.notify(method, params).await,
            Transport::Http(t) => t.notify(method, params).await,
        }
    }

    /// Release the connection. Closing stdin is the shutdown signal for stdio servers.
    pub async fn close(&self) {
        match self {
            Transport::Stdio(t) => t.close().await,
            Transport::Http(t) => t.close().await,
        }
    }
}

// ─── Stdio ───────────────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

struct StdioChannel {
    writer: BoxedWriter,
    reader: BufReader<BoxedReader>,
}

/// Bi-directional JSON-RPC transport over a byte pipe pair.
pub struct StdioTransport {
    server_name: String,
    channel: Mutex<StdioChannel>,
}

impl StdioTransport {
    /// Create a transport from the server's input (our writer) and output (our reader).
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            channel: Mutex::new(StdioChannel {
                writer: Box::new(writer),
                reader: BufReader::new(Box::new(reader)),
            }),
        }
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// Lines that are not responses are handled in place: server log output
    /// is skipped, notifications are ignored, and server-to-client requests
    /// get an immediate answer so the server is never left waiting.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let line = self.encode(&JsonRpcRequest::new(id, method, params))?;

        let mut channel = self.channel.lock().await;
        self.write_line(&mut channel.writer, &line).await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = channel
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_error(
                    "server stdout closed (process may have exited)".into(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: serde_json::Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = trimmed, "skipping non-JSON output");
                    continue;
                }
            };

            if let Some(incoming) = value.get("method").and_then(|m| m.as_str()) {
                match value.get("id") {
                    Some(req_id) => {
                        let reply = reply_to_server_request(incoming, req_id.clone());
                        let reply_line = self.encode(&reply)?;
                        self.write_line(&mut channel.writer, &reply_line).await?;
                    }
                    None => {
                        tracing::debug!(server = %self.server_name, method = incoming, "server notification");
                    }
                }
                continue;
            }

            match serde_json::from_value::<JsonRpcResponse>(value) {
                Ok(resp) if resp.id == id => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(server = %self.server_name, expected = id, got = resp.id, "skipping stale response");
                }
                Err(e) => {
                    tracing::debug!(server = %self.server_name, error = %e, "skipping malformed message");
                }
            }
        }
    }

    /// Send a JSON-RPC notification.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let line = self.encode(&JsonRpcNotification::new(method, params))?;
        let mut channel = self.channel.lock().await;
        self.write_line(&mut channel.writer, &line).await
    }

    /// Close the server's input stream.
    pub async fn close(&self) {
        let mut channel = self.channel.lock().await;
        if let Err(e) = channel.writer.shutdown().await {
            tracing::debug!(server = %self.server_name, error = %e, "stdin already closed");
        }
    }

    fn encode<T: serde::Serialize>(&self, message: &T) -> Result<String, McpError> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| self.transport_error(format!("failed to serialize message: {e}")))?;
        json.push('\n');
        Ok(json)
    }

    async fn write_line(&self, writer: &mut BoxedWriter, line: &str) -> Result<(), McpError> {
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }
}

/// Answer a request the server sent to us. Only `ping` is supported.
fn reply_to_server_request(method: &str, id: serde_json::Value) -> serde_json::Value {
    if method == "ping" {
        serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}})
    } else {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": error_codes::METHOD_NOT_FOUND,
                "message": format!("client does not support '{method}'"),
            }
        })
    }
}

// ─── HTTP ────────────────────────────────────────────────────────────────────

/// JSON-RPC over HTTP POST.
pub struct HttpTransport {
    server_name: String,
    url: String,
    http: reqwest::Client,
    headers: HeaderMap,
    /// Session id assigned by the server; also the exchange lock.
    session: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(
        server_name: &str,
        url: &str,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        for (key, value) in extra_headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| McpError::ConfigError {
                reason: format!("server '{server_name}': invalid header name '{key}': {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| McpError::ConfigError {
                reason: format!("server '{server_name}': invalid value for header '{key}': {e}"),
            })?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| McpError::SpawnFailed {
                name: server_name.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            server_name: server_name.to_string(),
            url: url.to_string(),
            http,
            headers,
            session: Mutex::new(None),
        })
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let body = serde_json::to_value(JsonRpcRequest::new(id, method, params))
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        let mut session = self.session.lock().await;
        let response = self.post(&body, session.as_deref()).await?;

        if let Some(assigned) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *session = Some(assigned.to_string());
        }

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(format!("failed to read response body: {e}")))?;

        if is_sse {
            response_from_event_stream(&text, id)
                .ok_or_else(|| self.transport_error(format!("no response for request {id} in event stream")))
        } else {
            serde_json::from_str(&text)
                .map_err(|e| self.transport_error(format!("malformed JSON-RPC response: {e}")))
        }
    }

    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let body = serde_json::to_value(JsonRpcNotification::new(method, params))
            .map_err(|e| self.transport_error(format!("failed to serialize notification: {e}")))?;
        let session = self.session.lock().await;
        self.post(&body, session.as_deref()).await.map(|_| ())
    }

    /// End the server-side session, if one was assigned.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        if let Some(id) = session.take() {
            let result = self
                .http
                .delete(&self.url)
                .headers(self.headers.clone())
                .header(SESSION_HEADER, id)
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!(server = %self.server_name, error = %e, "session delete failed");
            }
        }
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        session: Option<&str>,
    ) -> Result<reqwest::Response, McpError> {
        let mut request = self.http.post(&self.url).headers(self.headers.clone()).json(body);
        if let Some(id) = session {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(format!("POST {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }
        Ok(response)
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }
}

/// Find the response with `id` among the events of an SSE body.
fn response_from_event_stream(body: &str, id: u64) -> Option<JsonRpcResponse> {
    let normalized = body.replace("\r\n", "\n");
    normalized.split("\n\n").find_map(|event| {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect();
        if data.is_empty() {
            return None;
        }
        serde_json::from_str::<JsonRpcResponse>(&data.join("\n"))
            .ok()
            .filter(|resp| resp.id == id)
    })
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
