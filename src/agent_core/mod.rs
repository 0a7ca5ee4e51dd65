//! Agent Core: messages, persistence, and the conversation loop.
//!
//! Submodules:
//! - `types`: Message, Role, Chat and friends
//! - `database`: SQLite persistence behind the `MessageStore` contract
//! - `conversation_loop`: the bounded model / tool-call cycle for one turn
//! - `conversation`: persists a turn around the loop
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod conversation_loop;
pub mod database;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use conversation::ConversationManager;
pub use conversation_loop::{ConversationLoop, LoopConfig, TurnOptions, TurnOutcome, TurnState};
pub use database::{AgentDatabase, MessageStore};
pub use errors::AgentError;
pub use types::{Chat, ContentType, Message, MessageRole, Role, ToolCallRecord};
