//! Provider error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries and user-facing error messages.

use thiserror::Error;

/// Errors that can occur while talking to an LLM provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// TCP/HTTP connection to the provider endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The provider did not respond within the configured timeout.
    #[error("request timed out after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the provider.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// SSE stream parsing or body decoding error.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// Failed to parse a tool call from the model's response.
    #[error("tool call parse error: {reason}")]
    ToolCallParseError {
        raw_response: String,
        reason: String,
    },

    /// The history contains a payload this provider cannot accept.
    #[error("{provider} does not support {content_type} content")]
    UnsupportedContent {
        provider: String,
        content_type: String,
    },

    /// Missing API key, bad base URL, or similar.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl ProviderError {
    /// HTTP-like status code for this failure.
    ///
    /// Transport failures without a real response map onto the closest
    /// gateway status so callers can treat every error uniformly.
    pub fn status(&self) -> u16 {
        match self {
            ProviderError::HttpError { status, .. } => *status,
            ProviderError::ConnectionFailed { .. } => 502,
            ProviderError::Timeout { .. } => 504,
            ProviderError::StreamError { .. } | ProviderError::ToolCallParseError { .. } => 502,
            ProviderError::UnsupportedContent { .. } => 415,
            ProviderError::ConfigError { .. } => 400,
        }
    }

    /// Coarse failure category, used in logs and user-visible messages.
    pub fn category(&self) -> &'static str {
        match self.status() {
            401 | 403 => "authentication",
            429 => "rate_limit",
            400 | 404 | 415 | 422 => "invalid_request",
            504 => "timeout",
            500..=599 => match self {
                ProviderError::ConnectionFailed { .. } => "connection",
                ProviderError::StreamError { .. } | ProviderError::ToolCallParseError { .. } => {
                    "malformed_response"
                }
                _ => "provider_unavailable",
            },
            _ => "unknown",
        }
    }

    /// Build a `ProviderError` from a failed `reqwest` send.
    pub(crate) fn from_reqwest(endpoint: &str, e: reqwest::Error, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout {
                duration_secs: timeout_secs,
            }
        } else {
            ProviderError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        }
    }
}
