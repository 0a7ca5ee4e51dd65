//! HTTP plumbing shared by every provider transport.
//!
//! Holds two `reqwest` clients (batch and streaming, with different total
//! timeouts) and maps transport failures and non-2xx statuses onto
//! `ProviderError`.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Client as HttpClient;
use serde::Serialize;

use super::errors::ProviderError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Total request timeout for streaming calls.
///
/// Reasoning models can think for a long time before the first token, and
/// the whole body has to arrive inside this window.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// ─── ProviderClient ──────────────────────────────────────────────────────────

/// Shared HTTP client for provider endpoints. Cheap to clone.
#[derive(Clone)]
pub struct ProviderClient {
    /// HTTP client for non-streaming requests.
    http: HttpClient,
    /// HTTP client for streaming requests.
    http_stream: HttpClient,
}

impl ProviderClient {
    pub fn new() -> Result<Self, ProviderError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::ConfigError {
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self { http, http_stream })
    }

    /// POST a JSON body and return the full response text.
    pub async fn post_json<B: Serialize>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
    ) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(url, e, REQUEST_TIMEOUT.as_secs()))?;

        let response = check_status(response).await?;

        response.text().await.map_err(|e| ProviderError::StreamError {
            reason: format!("failed to read response body: {e}"),
        })
    }

    /// POST a JSON body asking for `text/event-stream`; returns the open response.
    pub async fn post_stream<B: Serialize>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http_stream
            .post(url)
            .headers(headers)
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(url, e, STREAM_REQUEST_TIMEOUT.as_secs()))?;

        check_status(response).await
    }
}

/// Turn a non-2xx response into `ProviderError::HttpError`.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), body = %body, "provider returned error status");
    Err(ProviderError::HttpError {
        status: status.as_u16(),
        body: extract_error_message(&body),
    })
}

/// Pull `error.message` out of a provider error body when there is one.
///
/// Both OpenAI-style (`{"error": {"message": …}}`) and Anthropic-style
/// (`{"type": "error", "error": {"message": …}}`) bodies share this shape.
pub fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────────
