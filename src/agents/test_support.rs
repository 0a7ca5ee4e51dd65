//! Test doubles for the provider agents: a one-shot HTTP server and a tool lister.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::mcp_client::{ProtocolHandler, ResourceContent, ToolCallResult, ToolError, ToolSpec};

/// A request captured by [`serve_once`].
pub(crate) struct CapturedRequest {
    pub head: String,
    pub body: serde_json::Value,
}

impl CapturedRequest {
    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

/// Answer exactly one request with `status`, `content_type` and `body`.
///
/// Returns the base URL to point an agent at and a handle that resolves to
/// the captured request.
pub(crate) async fn serve_once(
    status: u16,
    content_type: &'static str,
    body: impl Into<String>,
) -> (String, JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.into();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            raw.extend_from_slice(&buf[..n]);
            if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while raw.len() < header_end + content_length {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "HTTP/1.1 {status} X\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();

        CapturedRequest {
            head,
            body: serde_json::from_slice(&raw[header_end..]).unwrap_or(serde_json::Value::Null),
        }
    });

    (format!("http://{addr}/v1"), handle)
}

/// Handler that advertises tools but never runs them.
pub(crate) struct ListedTools(pub Vec<ToolSpec>);

#[async_trait]
impl ProtocolHandler for ListedTools {
    fn tools(&self) -> Vec<ToolSpec> {
        self.0.clone()
    }

    async fn use_tool(
        &self,
        name: &str,
        _arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ToolError> {
        Err(ToolError::NotFound { name: name.to_string() })
    }

    async fn access_resource(
        &self,
        uri: &str,
    ) -> Result<Vec<ResourceContent>, ToolError> {
        Err(ToolError::NotFound { name: uri.to_string() })
    }
}

pub(crate) fn read_file_spec() -> ToolSpec {
    ToolSpec {
        name: "files__read_file".into(),
        description: "Read a file".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        }),
    }
}
