//! Inference: provider transport for the chat agents.
//!
//! This module handles the wire side of talking to LLM providers:
//! - OpenAI Chat Completions and Anthropic Messages request/response types
//! - Streaming (SSE) and non-streaming response parsing
//! - Native and text-based tool call parsing
//! - Shared HTTP clients and `ProviderError`
//!
//! Agents in `crate::agents` translate conversation history into these wire
//! types and turn the parsed `StreamChunk`s into agent replies.

pub mod client;
pub mod errors;
pub mod streaming;
pub mod tool_call_parser;
pub mod types;

// Re-exports for convenience
pub use client::ProviderClient;
pub use errors::ProviderError;
pub use tool_call_parser::ToolCallFormat;
pub use types::{StreamChunk, ToolCall};
