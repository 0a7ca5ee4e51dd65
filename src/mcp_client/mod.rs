//! MCP Client: the Protocol Handler behind every tool call.
//!
//! This module handles:
//! - Loading the tool-server registry file
//! - Connecting to servers over stdio child processes or HTTP
//! - The MCP handshake and tool / resource / prompt discovery
//! - Tool call routing, validation, and execution
//!
//! The conversation loop only sees the [`ProtocolHandler`] trait.

pub mod client;
pub mod config;
pub mod errors;
pub mod handler;
pub mod lifecycle;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::McpClient;
pub use errors::{McpError, ToolError};
pub use handler::ProtocolHandler;
pub use types::{McpServersConfig, ResourceContent, ServerConfig, ToolCallResult, ToolSpec};
