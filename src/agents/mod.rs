//! Agents: one per provider family, behind a single trait.
//!
//! An agent turns an ordered message history into either a text reply or a
//! tool call request. Agents never run tools themselves; they only surface
//! the request to the conversation loop.

pub mod anthropic;
pub mod dummy;
pub mod model;
pub mod openai;
pub mod tool_format;

#[cfg(test)]
pub(crate) mod test_support;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream};

use crate::agent_core::types::{Message, Role};
use crate::config::AppConfig;
use crate::inference::{ProviderClient, ProviderError, StreamChunk, ToolCall};
use crate::inference::tool_call_parser::generate_call_id;
use crate::mcp_client::ProtocolHandler;

pub use anthropic::AnthropicAgent;
pub use dummy::DummyAgent;
pub use model::{Model, Provider, UnknownModel};
pub use openai::OpenAiCompatAgent;

// ─── Results ─────────────────────────────────────────────────────────────────

/// A complete agent response.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    Text(String),
    ToolCall(ToolCall),
}

impl AgentReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Tool call request with a freshly generated call id.
    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::ToolCall(ToolCall {
            id: generate_call_id(),
            name: name.into(),
            arguments,
        })
    }

    /// Collapse a parsed provider response into a reply.
    ///
    /// Only the first tool call is surfaced; the loop runs one call per round.
    pub fn from_chunk(chunk: StreamChunk) -> Self {
        match chunk.tool_calls {
            Some(mut calls) if !calls.is_empty() => {
                if calls.len() > 1 {
                    tracing::warn!(
                        count = calls.len(),
                        kept = %calls[0].name,
                        "model requested parallel tool calls, running the first"
                    );
                }
                Self::ToolCall(calls.swap_remove(0))
            }
            _ => Self::Text(chunk.token.unwrap_or_default()),
        }
    }
}

/// One piece of a streamed response, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentFragment {
    Text(String),
    ToolCall(ToolCall),
}

impl From<AgentReply> for AgentFragment {
    fn from(reply: AgentReply) -> Self {
        match reply {
            AgentReply::Text(t) => Self::Text(t),
            AgentReply::ToolCall(c) => Self::ToolCall(c),
        }
    }
}

/// Finite, single-pass fragment stream.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<AgentFragment, ProviderError>> + Send>>;

/// Split a decoded SSE chunk into fragments.
pub(crate) fn fragments_from_chunk(
    item: Result<StreamChunk, ProviderError>,
) -> Vec<Result<AgentFragment, ProviderError>> {
    match item {
        Err(e) => vec![Err(e)],
        Ok(chunk) => {
            let mut out = Vec::new();
            if let Some(token) = chunk.token.filter(|t| !t.is_empty()) {
                out.push(Ok(AgentFragment::Text(token)));
            }
            out.extend(
                chunk
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| Ok(AgentFragment::ToolCall(c))),
            );
            out
        }
    }
}

// ─── Agent ───────────────────────────────────────────────────────────────────

/// The per-provider contract the conversation loop depends on.
#[async_trait]
pub trait Agent: Send + Sync {
    fn model(&self) -> Model;

    /// Display identity stamped on this agent's messages.
    fn role(&self) -> &Role;

    /// Whether `request_streaming` delivers incrementally.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Complete response for `history`. Must not mutate the history.
    async fn request(&self, history: &[Message]) -> Result<AgentReply, ProviderError>;

    /// Incremental response for `history`.
    async fn request_streaming(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let reply = self.request(history).await?;
        Ok(Box::pin(stream::iter([Ok(AgentFragment::from(reply))])))
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// One agent per model, built once at startup.
pub struct AgentRegistry {
    agents: [Arc<dyn Agent>; Model::COUNT],
}

impl AgentRegistry {
    /// Build the real agents. All share one HTTP client and one handler.
    pub fn new(
        config: &AppConfig,
        handler: Option<Arc<dyn ProtocolHandler>>,
    ) -> Result<Self, ProviderError> {
        let client = ProviderClient::new()?;
        Ok(Self::from_fn(|model| {
            build_agent(model, config, &client, handler.clone())
        }))
    }

    /// Build with a custom constructor per model.
    pub fn from_fn(mut build: impl FnMut(Model) -> Arc<dyn Agent>) -> Self {
        Self {
            agents: Model::ALL.map(&mut build),
        }
    }

    pub fn get(&self, model: Model) -> Arc<dyn Agent> {
        self.agents[model.index()].clone()
    }
}

fn build_agent(
    model: Model,
    config: &AppConfig,
    client: &ProviderClient,
    handler: Option<Arc<dyn ProtocolHandler>>,
) -> Arc<dyn Agent> {
    let role = Role::agent(&config.agent_name, model.id());
    match model.provider() {
        Provider::Anthropic => Arc::new(AnthropicAgent::new(
            model,
            role,
            config.provider(Provider::Anthropic),
            client.clone(),
            handler,
        )),
        Provider::Dummy => Arc::new(DummyAgent::echo(role)),
        provider => Arc::new(OpenAiCompatAgent::new(
            model,
            role,
            config.provider(provider),
            client.clone(),
            handler,
        )),
    }
}
