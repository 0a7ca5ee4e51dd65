//! Agent Core error types.

use thiserror::Error;

/// Errors from the persistence side of the agent core.
///
/// The conversation loop itself never returns an error; everything that
/// goes wrong during a turn becomes an application-role message.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Chat not found.
    #[error("chat not found: '{chat_id}'")]
    ChatNotFound { chat_id: String },

    /// A stored row could not be turned back into a message.
    #[error("corrupt record '{id}': {reason}")]
    CorruptRecord { id: String, reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}
