//! Anthropic Messages API agent.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};

use super::tool_format::to_anthropic_tools;
use super::{fragments_from_chunk, Agent, AgentReply, FragmentStream, Model};
use crate::agent_core::types::{ContentType, Message, MessageRole, Role};
use crate::config::ProviderSettings;
use crate::inference::client::join_url;
use crate::inference::streaming::{decode_sse_response, parse_anthropic_response, AnthropicStreamDecoder};
use crate::inference::types::{AnthropicBlock, AnthropicMessage, ImageSource, MessagesRequest};
use crate::inference::{ProviderClient, ProviderError};
use crate::mcp_client::ProtocolHandler;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Required by the Messages API; used when the config leaves it unset.
const DEFAULT_MAX_TOKENS: u32 = 2048;

pub struct AnthropicAgent {
    model: Model,
    role: Role,
    settings: ProviderSettings,
    client: ProviderClient,
    handler: Option<Arc<dyn ProtocolHandler>>,
}

impl AnthropicAgent {
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
        let key = self.settings.api_key.as_deref().ok_or_else(|| ProviderError::ConfigError {
            reason: "no API key configured for anthropic".into(),
        })?;
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(key).map_err(|e| ProviderError::ConfigError {
                reason: format!("invalid anthropic API key: {e}"),
            })?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        Ok(headers)
    }

    fn build_request(&self, history: &[Message], stream: bool) -> MessagesRequest {
        let (system, messages) = to_anthropic_messages(history);
        let tools = self
            .handler
            .as_ref()
            .map(|h| h.tools())
            .filter(|t| !t.is_empty())
            .map(|t| to_anthropic_tools(&t));

        MessagesRequest {
            model: self.model.id().to_string(),
            max_tokens: self.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            tools,
            temperature: self.settings.temperature,
            stream,
        }
    }

    fn url(&self) -> String {
        join_url(&self.settings.base_url, "messages")
    }
}

#[async_trait]
impl Agent for AnthropicAgent {
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
        let headers = self.headers()?;
        let body = self.build_request(history, false);
        tracing::debug!(model = %self.model, messages = body.messages.len(), "sending messages request");

        let text = self.client.post_json(&self.url(), headers, &body).await?;
        Ok(AgentReply::from_chunk(parse_anthropic_response(&text)?))
    }

    async fn request_streaming(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let headers = self.headers()?;
        let body = self.build_request(history, true);
        tracing::debug!(model = %self.model, messages = body.messages.len(), "sending streaming messages request");

        let response = self.client.post_stream(&self.url(), headers, &body).await?;
        let chunks = decode_sse_response(response, AnthropicStreamDecoder::new());
        Ok(Box::pin(
            chunks.flat_map(|item| stream::iter(fragments_from_chunk(item))),
        ))
    }
}

// ─── History conversion ──────────────────────────────────────────────────────

/// Split a chat history into Anthropic's top-level `system` string and its
/// alternating `user` / `assistant` turns.
///
/// Consecutive blocks for the same role share one message, and empty text
/// blocks are dropped; the API rejects both.
pub fn to_anthropic_messages(history: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system: Vec<&str> = Vec::new();
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for msg in history.iter().filter(|m| m.is_model_visible()) {
        let text = msg.model_text().unwrap_or_default();

        if let (ContentType::ToolResult, Some(call)) = (msg.content_type, &msg.tool_call) {
            push_block(
                &mut messages,
                "assistant",
                AnthropicBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                },
            );
            push_block(
                &mut messages,
                "user",
                AnthropicBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: text.to_string(),
                },
            );
            continue;
        }

        match msg.role {
            MessageRole::System => {
                if !text.is_empty() {
                    system.push(text);
                }
            }
            MessageRole::Agent => push_text(&mut messages, "assistant", text),
            MessageRole::User | MessageRole::Application => match msg.content_type.image_media_type() {
                Some(media_type) => {
                    push_text(&mut messages, "user", msg.content.as_deref().unwrap_or_default());
                    push_block(
                        &mut messages,
                        "user",
                        AnthropicBlock::Image {
                            source: ImageSource {
                                r#type: "base64",
                                media_type: media_type.to_string(),
                                data: msg.system_content.clone().unwrap_or_default(),
                            },
                        },
                    );
                }
                None => push_text(&mut messages, "user", text),
            },
        }
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, messages)
}

fn push_text(messages: &mut Vec<AnthropicMessage>, role: &'static str, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    push_block(messages, role, AnthropicBlock::Text { text: text.to_string() });
}

fn push_block(messages: &mut Vec<AnthropicMessage>, role: &'static str, block: AnthropicBlock) {
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.push(block),
        _ => messages.push(AnthropicMessage {
            role,
            content: vec![block],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::ToolCallRecord;
    use crate::agents::test_support::{read_file_spec, serve_once, ListedTools};
    use crate::agents::AgentFragment;
    use crate::inference::ToolCallFormat;
    use serde_json::json;

    fn agent(base_url: &str, handler: Option<Arc<dyn ProtocolHandler>>) -> AnthropicAgent {
        AnthropicAgent::new(
            Model::Claude35Haiku,
            Role::agent("Agent", Model::Claude35Haiku.id()),
            ProviderSettings {
                base_url: base_url.to_string(),
                api_key: Some("sk-ant-test".into()),
                max_tokens: None,
                temperature: None,
                tool_call_format: ToolCallFormat::NativeJson,
            },
            ProviderClient::new().unwrap(),
            handler,
        )
    }

    fn user(text: &str) -> Message {
        Message::user_text("c1", text, Role::user("User"))
    }

    #[test]
    fn test_system_hoisted_and_roles_merged() {
        let history = vec![
            Message::system_text("c1", "Be brief."),
            user("one"),
            user("two"),
            Message::agent_text("c1", "", Role::agent("Agent", "claude")),
            Message::application_error("c1", "HTTP 500", Role::application("App")),
            Message::agent_text("c1", "three", Role::agent("Agent", "claude")),
        ];
        let (system, messages) = to_anthropic_messages(&history);
        assert_eq!(system.as_deref(), Some("Be brief."));
        let wire = serde_json::to_value(&messages).unwrap();
        assert_eq!(
            wire,
            json!([
                {"role": "user", "content": [{"type": "text", "text": "one"}, {"type": "text", "text": "two"}]},
                {"role": "assistant", "content": [{"type": "text", "text": "three"}]}
            ])
        );
    }

    #[test]
    fn test_tool_result_becomes_tool_use_pair() {
        let call = ToolCallRecord {
            id: "toolu_1".into(),
            name: "files__read_file".into(),
            arguments: json!({"path": "X"}),
        };
        let history = vec![
            user("read file X"),
            Message::tool_result("c1", call, "contents...", Role::application("App")),
        ];
        let (_, messages) = to_anthropic_messages(&history);
        let wire = serde_json::to_value(&messages).unwrap();
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(
            wire[1]["content"][0],
            json!({"type": "tool_use", "id": "toolu_1", "name": "files__read_file", "input": {"path": "X"}})
        );
        assert_eq!(
            wire[2],
            json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_1", "content": "contents..."}]})
        );
    }

    #[test]
    fn test_image_block() {
        let image = Message::new(
            "c1",
            MessageRole::User,
            ContentType::Jpeg,
            Some("photo.jpg".into()),
            Role::user("User"),
        )
        .with_system_content("/9j/4AAQ");
        let (_, messages) = to_anthropic_messages(&[image]);
        let wire = serde_json::to_value(&messages).unwrap();
        assert_eq!(
            wire[0]["content"][1],
            json!({"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "/9j/4AAQ"}})
        );
    }

    #[test]
    fn test_request_defaults() {
        let handler: Arc<dyn ProtocolHandler> = Arc::new(ListedTools(vec![read_file_spec()]));
        let body = agent("http://x", Some(handler)).build_request(&[user("hi")], false);
        assert_eq!(body.max_tokens, 2048);
        assert_eq!(body.tools.as_ref().map(Vec::len), Some(1));
        assert!(body.system.is_none());
    }

    #[tokio::test]
    async fn test_request_sends_headers_and_parses_tool_use() {
        let (base, server) = serve_once(
            200,
            "application/json",
            r#"{"content":[{"type":"text","text":"Let me look."},{"type":"tool_use","id":"toolu_7","name":"files__read_file","input":{"path":"X"}}],"stop_reason":"tool_use"}"#,
        )
        .await;
        let reply = agent(&base, None).request(&[user("read X")]).await.unwrap();
        match reply {
            AgentReply::ToolCall(call) => {
                assert_eq!(call.id, "toolu_7");
                assert_eq!(call.arguments, json!({"path": "X"}));
            }
            other => panic!("expected tool call, got {other:?}"),
        }

        let req = server.await.unwrap();
        assert!(req.head.starts_with("POST /v1/messages"));
        assert_eq!(req.header("x-api-key").as_deref(), Some("sk-ant-test"));
        assert_eq!(req.header("anthropic-version").as_deref(), Some("2023-06-01"));
    }

    #[tokio::test]
    async fn test_streaming_text() {
        let sse = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"4\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        let (base, _server) = serve_once(200, "text/event-stream", sse).await;
        let frags: Vec<AgentFragment> = agent(&base, None)
            .request_streaming(&[user("2+2?")])
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frags, vec![AgentFragment::Text("4".into())]);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let mut agent = agent("http://127.0.0.1:9", None);
        agent.settings.api_key = None;
        let err = agent.request(&[user("hi")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::ConfigError { .. }));
    }
}
