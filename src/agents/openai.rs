//! OpenAI Chat Completions agent.
//!
//! Serves every OpenAI-compatible provider: OpenAI itself, Gemini's
//! compatibility endpoint, DeepSeek and a local Ollama runtime.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use super::tool_format::to_openai_tools;
use super::{fragments_from_chunk, Agent, AgentReply, FragmentStream, Model, Provider};
use crate::agent_core::types::{ContentType, Message, MessageRole, Role};
use crate::config::ProviderSettings;
use crate::inference::client::join_url;
use crate::inference::streaming::{decode_sse_response, parse_openai_response, OpenAiStreamDecoder};
use crate::inference::types::{
    self as wire, ChatCompletionRequest, ChatMessage, ContentPart, FunctionCallResponse, ImageUrl,
    MessageContent, ToolCallResponse,
};
use crate::inference::{ProviderClient, ProviderError};
use crate::mcp_client::ProtocolHandler;

pub struct OpenAiCompatAgent {
    model: Model,
    role: Role,
    settings: ProviderSettings,
    client: ProviderClient,
    handler: Option<Arc<dyn ProtocolHandler>>,
}

impl OpenAiCompatAgent {
    pub fn new(
        model: Model,
        role: Role,
        settings: ProviderSettings,
        client: ProviderClient,
        handler: Option<Arc<dyn ProtocolHandler>>,
    ) -> Self {
        Self {
            model,
            role,
            settings,
            client,
            handler,
        }
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let provider = self.model.provider();
        let mut headers = HeaderMap::new();
        match &self.settings.api_key {
            Some(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                    ProviderError::ConfigError {
                        reason: format!("invalid {provider} API key: {e}"),
                    }
                })?;
                headers.insert(AUTHORIZATION, value);
            }
            // Ollama does not check keys
            None if provider == Provider::Local => {}
            None => {
                return Err(ProviderError::ConfigError {
                    reason: format!("no API key configured for {provider}"),
                })
            }
        }
        Ok(headers)
    }

    fn build_request(
        &self,
        history: &[Message],
        stream: bool,
    ) -> Result<ChatCompletionRequest, ProviderError> {
        let provider = self.model.provider();
        let messages = to_chat_messages(history, provider)?;

        let tools = self
            .handler
            .as_ref()
            .filter(|_| self.model.supports_tools())
            .map(|h| h.tools())
            .filter(|t| !t.is_empty())
            .map(|t| to_openai_tools(&t, provider));

        Ok(ChatCompletionRequest {
            model: self.model.id().to_string(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self
                .settings
                .temperature
                .filter(|_| !self.model.is_reasoning()),
            max_tokens: self.settings.max_tokens,
            stream,
        })
    }

    fn url(&self) -> String {
        join_url(&self.settings.base_url, "chat/completions")
    }
}

#[async_trait]
impl Agent for OpenAiCompatAgent {
    fn model(&self) -> Model {
        self.model
    }

    fn role(&self) -> &Role {
        &self.role
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn request(&self, history: &[Message]) -> Result<AgentReply, ProviderError> {
        let body = self.build_request(history, false)?;
        tracing::debug!(
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "sending chat completion"
        );

        let text = self.client.post_json(&self.url(), self.headers()?, &body).await?;
        let chunk = parse_openai_response(&text, self.settings.tool_call_format)?;
        Ok(AgentReply::from_chunk(chunk))
    }

    async fn request_streaming(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let body = self.build_request(history, true)?;
        tracing::debug!(
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "sending streaming chat completion"
        );

        let response = self.client.post_stream(&self.url(), self.headers()?, &body).await?;
        let chunks = decode_sse_response(
            response,
            OpenAiStreamDecoder::new(self.settings.tool_call_format),
        );
        Ok(Box::pin(
            chunks.flat_map(|item| stream::iter(fragments_from_chunk(item))),
        ))
    }
}

// ─── History conversion ──────────────────────────────────────────────────────

/// Translate a chat history into Chat Completions messages.
///
/// Error messages are dropped. A tool-result message expands into the
/// assistant call it answers followed by the `tool` result.
pub fn to_chat_messages(
    history: &[Message],
    provider: Provider,
) -> Result<Vec<ChatMessage>, ProviderError> {
    let mut out = Vec::with_capacity(history.len());

    for msg in history.iter().filter(|m| m.is_model_visible()) {
        let text = msg.model_text().unwrap_or_default();

        if let (ContentType::ToolResult, Some(call)) = (msg.content_type, &msg.tool_call) {
            out.push(ChatMessage {
                role: wire::Role::Assistant,
                content: None,
                tool_call_id: None,
                tool_calls: Some(vec![ToolCallResponse {
                    id: call.id.clone(),
                    r#type: "function".to_string(),
                    function: FunctionCallResponse {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                }]),
            });
            out.push(ChatMessage {
                role: wire::Role::Tool,
                content: Some(MessageContent::Text(text.to_string())),
                tool_call_id: Some(call.id.clone()),
                tool_calls: None,
            });
            continue;
        }

        let role = match msg.role {
            MessageRole::System => wire::Role::System,
            MessageRole::Agent => wire::Role::Assistant,
            MessageRole::User | MessageRole::Application => wire::Role::User,
        };

        match msg.content_type.image_media_type() {
            Some(media_type) => {
                if !provider.accepts_images() {
                    return Err(ProviderError::UnsupportedContent {
                        provider: provider.to_string(),
                        content_type: msg.content_type.as_str().to_string(),
                    });
                }
                let mut parts = Vec::with_capacity(2);
                if let Some(caption) = msg.content.as_deref().filter(|c| !c.is_empty()) {
                    parts.push(ContentPart::Text {
                        text: caption.to_string(),
                    });
                }
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!(
                            "data:{media_type};base64,{}",
                            msg.system_content.as_deref().unwrap_or_default()
                        ),
                    },
                });
                out.push(ChatMessage {
                    role,
                    content: Some(MessageContent::Parts(parts)),
                    tool_call_id: None,
                    tool_calls: None,
                });
            }
            None => out.push(ChatMessage::text(role, text)),
        }
    }

    Ok(out)
}
