//! In-process tool server speaking MCP over a duplex pipe.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::transport::StdioTransport;

/// Methods and notifications the fake server has received, in order.
pub(crate) type SeenMethods = Arc<Mutex<Vec<String>>>;

/// Start a fake server named `name`.
///
/// Tools: `echo` (returns `arguments.text`), `fail` (reports `isError`),
/// `slow` (answers after 300ms), `big` (returns 10 000 chars).
/// Resource: `file:///notes.txt`. Prompt: `summarize` (argument `topic`).
pub(crate) fn fake_server(name: &str) -> (StdioTransport, SeenMethods) {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let transport = StdioTransport::new(name, client_write, client_read);
    let seen: SeenMethods = Arc::new(Mutex::new(Vec::new()));

    let seen_by_server = seen.clone();
    let server_name = name.to_string();
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server_side);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let method = msg["method"].as_str().unwrap_or_default().to_string();
            seen_by_server.lock().unwrap().push(method.clone());
            let Some(id) = msg.get("id").cloned() else {
                continue;
            };
            let reply = match answer(&server_name, &method, &msg["params"]).await {
                Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                Err((code, message)) => {
                    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
                }
            };
            if write
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    });

    (transport, seen)
}

async fn answer(server: &str, method: &str, params: &Value) -> Result<Value, (i32, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": params["protocolVersion"],
            "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
            "serverInfo": {"name": server, "version": "0.1.0"}
        })),
        "tools/list" => Ok(json!({"tools": [
            {
                "name": "echo",
                "description": "Echo text back",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }
            },
            {"name": "fail", "description": "Always fails"},
            {"name": "slow", "description": "Takes a while"},
            {"name": "big", "description": "Large output"}
        ]})),
        "resources/list" => Ok(json!({"resources": [
            {"uri": "file:///notes.txt", "name": "notes", "mimeType": "text/plain"}
        ]})),
        "prompts/list" => Ok(json!({"prompts": [
            {"name": "summarize", "arguments": [{"name": "topic", "required": true}]}
        ]})),
        "tools/call" => match params["name"].as_str().unwrap_or_default() {
            "echo" => Ok(json!({
                "content": [{"type": "text", "text": params["arguments"]["text"]}]
            })),
            "fail" => Ok(json!({
                "content": [{"type": "text", "text": "disk on fire"}],
                "isError": true
            })),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(json!({"content": [{"type": "text", "text": "done"}]}))
            }
            "big" => Ok(json!({"content": [{"type": "text", "text": "x".repeat(10_000)}]})),
            other => Err((-32602, format!("unknown tool: {other}"))),
        },
        "resources/read" => Ok(json!({"contents": [
            {"uri": params["uri"], "mimeType": "text/plain", "text": "remember the milk"}
        ]})),
        "prompts/get" => Ok(json!({"messages": [
            {
                "role": "user",
                "content": {
                    "type": "text",
                    "text": format!("Summarize {}", params["arguments"]["topic"].as_str().unwrap_or("?"))
                }
            }
        ]})),
        other => Err((-32601, format!("method not found: {other}"))),
    }
}
