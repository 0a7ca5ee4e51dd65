//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The tool ran but reported failure (`isError: true`).
    #[error("tool '{tool}' reported an error: {message}")]
    ToolReportedError { tool: String, message: String },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A tool call timed out.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// The owning server is not running (never started or its pipe closed).
    #[error("server '{name}' unavailable: {reason}")]
    ServerUnavailable { name: String, reason: String },

    /// Configuration error (bad registry file, entry without command or url).
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

/// Failure of a Protocol Handler operation, as seen by the conversation loop.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No configured server advertises this tool (or resource / prompt).
    #[error("tool not found: '{name}'")]
    NotFound { name: String },

    /// The owning server failed to carry out the call.
    #[error("tool '{name}' failed: {cause}")]
    ExecutionFailed {
        name: String,
        #[source]
        cause: McpError,
    },
}

impl ToolError {
    pub fn execution_failed(name: &str, cause: McpError) -> Self {
        ToolError::ExecutionFailed {
            name: name.to_string(),
            cause,
        }
    }
}
