//! The bounded request / tool-call cycle for one user turn.
//!
//! ```text
//! AwaitingModel ──► ModelResponded ──► Done
//!       ▲                 │
//!       │                 ▼
//!       └── ToolExecuting ◄── ToolRequested
//! ```
//!
//! The loop holds no per-turn state in its fields; everything lives in
//! `run_turn`'s locals, so one loop serves concurrent chats.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::types::{Message, Role, ToolCallRecord};
use crate::agents::{Agent, AgentFragment, AgentReply};
use crate::config::AppConfig;
use crate::inference::{ProviderError, ToolCall};
use crate::mcp_client::{ProtocolHandler, ToolError};

/// Shown when a model answers with neither text nor a tool call.
pub const EMPTY_RESPONSE_TEXT: &str = "No response generated.";

/// Shown when the final answer is empty after at least one tool ran.
pub const TOOL_USE_COMPLETED_TEXT: &str = "[Tool use completed]";

pub const CANCELLED_TEXT: &str = "Response cancelled.";

/// Loop settings taken from the application config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Tool executions allowed per turn. At least 1.
    pub max_chained_requests: u32,
    pub prefer_streaming: bool,
}

impl LoopConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            max_chained_requests: config.max_chained_requests.max(1),
            prefer_streaming: config.prefer_streaming,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_chained_requests: 5,
            prefer_streaming: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingModel,
    ModelResponded,
    ToolRequested,
    ToolExecuting,
    Done,
}

/// Per-turn caller hooks.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Cancelled by the caller to abandon the turn.
    pub cancel: CancellationToken,
    /// Receives streamed text fragments as they arrive.
    pub fragments: Option<UnboundedSender<String>>,
    /// Overrides `LoopConfig::prefer_streaming` for this turn.
    pub prefer_streaming: Option<bool>,
}

/// Everything a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// New messages in order. Never empty.
    pub messages: Vec<Message>,
    pub model_requests: u32,
    pub tool_calls: u32,
    pub cancelled: bool,
    pub final_state: TurnState,
}

pub struct ConversationLoop {
    handler: Arc<dyn ProtocolHandler>,
    config: LoopConfig,
    app_role: Role,
}

/// Result of one model request, already reassembled.
enum ModelStep {
    Reply(AgentReply),
    Cancelled,
}

impl ConversationLoop {
    pub fn new(handler: Arc<dyn ProtocolHandler>, config: LoopConfig, app_role: Role) -> Self {
        Self {
            handler,
            config,
            app_role,
        }
    }

    pub fn config(&self) -> LoopConfig {
        self.config
    }

    /// Run one turn over `history`, which already ends with the new user message.
    pub async fn run_turn(
        &self,
        agent: &dyn Agent,
        history: Vec<Message>,
        options: &TurnOptions,
    ) -> TurnOutcome {
        let chat_id = history.last().map(|m| m.chat_id.clone()).unwrap_or_default();
        let last_stamp = history.last().map(|m| m.created_at);
        let mut turn = Turn {
            chat_id,
            history,
            output: Vec::new(),
            last_stamp,
            model_requests: 0,
            tool_calls: 0,
            pending: None,
            pending_call: None,
        };

        let mut state = TurnState::AwaitingModel;
        loop {
            state = match state {
                TurnState::AwaitingModel => {
                    if options.cancel.is_cancelled() {
                        return self.cancelled(turn);
                    }
                    turn.model_requests += 1;
                    tracing::info!(
                        chat_id = %turn.chat_id,
                        model = %agent.model(),
                        request = turn.model_requests,
                        history_len = turn.history.len(),
                        "requesting model response"
                    );

                    match self.acquire(agent, &turn.history, options).await {
                        Ok(ModelStep::Cancelled) => return self.cancelled(turn),
                        Ok(ModelStep::Reply(reply)) => {
                            if options.cancel.is_cancelled() {
                                return self.cancelled(turn);
                            }
                            turn.pending = Some(reply);
                            TurnState::ModelResponded
                        }
                        Err(e) => {
                            tracing::warn!(
                                chat_id = %turn.chat_id,
                                model = %agent.model(),
                                status = e.status(),
                                category = e.category(),
                                error = %e,
                                "model request failed"
                            );
                            let msg = Message::application_error(
                                &turn.chat_id,
                                provider_error_text(&e),
                                self.app_role.clone(),
                            );
                            turn.emit(msg);
                            TurnState::Done
                        }
                    }
                }

                TurnState::ModelResponded => match turn.pending.take() {
                    Some(AgentReply::ToolCall(call)) => {
                        turn.pending_call = Some(call);
                        TurnState::ToolRequested
                    }
                    Some(AgentReply::Text(text)) => {
                        let text = if !text.trim().is_empty() {
                            text
                        } else if turn.tool_calls > 0 {
                            TOOL_USE_COMPLETED_TEXT.to_string()
                        } else {
                            tracing::warn!(chat_id = %turn.chat_id, "model returned no text and no tool call");
                            EMPTY_RESPONSE_TEXT.to_string()
                        };
                        let msg = Message::agent_text(&turn.chat_id, text, agent.role().clone());
                        turn.emit(msg);
                        TurnState::Done
                    }
                    None => TurnState::Done,
                },

                TurnState::ToolRequested => TurnState::ToolExecuting,

                TurnState::ToolExecuting => {
                    let Some(call) = turn.pending_call.take() else {
                        break;
                    };
                    turn.tool_calls += 1;
                    tracing::info!(
                        chat_id = %turn.chat_id,
                        tool = %call.name,
                        call_id = %call.id,
                        chained = turn.tool_calls,
                        "executing tool call"
                    );

                    let result = self.handler.use_tool(&call.name, call.arguments.clone()).await;
                    if options.cancel.is_cancelled() {
                        return self.cancelled(turn);
                    }

                    match result {
                        Ok(result) => {
                            tracing::info!(
                                tool = %call.name,
                                result_len = result.content.len(),
                                execution_time_ms = result.execution_time_ms,
                                "tool call succeeded"
                            );
                            let record = ToolCallRecord {
                                id: call.id,
                                name: call.name,
                                arguments: call.arguments,
                            };
                            let msg = Message::tool_result(
                                &turn.chat_id,
                                record,
                                result.content,
                                self.app_role.clone(),
                            );
                            turn.emit_to_history(msg);

                            if turn.tool_calls >= self.config.max_chained_requests {
                                tracing::warn!(
                                    chat_id = %turn.chat_id,
                                    limit = self.config.max_chained_requests,
                                    "chained tool call limit reached"
                                );
                                let msg = Message::application_error(
                                    &turn.chat_id,
                                    limit_reached_text(self.config.max_chained_requests),
                                    self.app_role.clone(),
                                );
                                turn.emit(msg);
                                TurnState::Done
                            } else {
                                TurnState::AwaitingModel
                            }
                        }
                        Err(e) => {
                            tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                            let msg = Message::application_error(
                                &turn.chat_id,
                                tool_error_text(&e),
                                self.app_role.clone(),
                            );
                            turn.emit(msg);
                            TurnState::Done
                        }
                    }
                }

                TurnState::Done => break,
            };
        }

        tracing::info!(
            chat_id = %turn.chat_id,
            model_requests = turn.model_requests,
            tool_calls = turn.tool_calls,
            output_len = turn.output.len(),
            "turn complete"
        );
        TurnOutcome {
            messages: turn.output,
            model_requests: turn.model_requests,
            tool_calls: turn.tool_calls,
            cancelled: false,
            final_state: TurnState::Done,
        }
    }

    /// Issue one model request, streaming when both sides want it.
    ///
    /// Streamed text before a tool call is dropped; only the tool call is
    /// kept. Fragments are forwarded to the caller's sink in arrival order.
    async fn acquire(
        &self,
        agent: &dyn Agent,
        history: &[Message],
        options: &TurnOptions,
    ) -> Result<ModelStep, ProviderError> {
        let prefer_streaming = options
            .prefer_streaming
            .unwrap_or(self.config.prefer_streaming);
        if !(prefer_streaming && agent.supports_streaming()) {
            return agent.request(history).await.map(ModelStep::Reply);
        }

        let mut fragments = agent.request_streaming(history).await?;
        let mut text = String::new();
        let mut tool_call: Option<ToolCall> = None;

        while let Some(fragment) = fragments.next().await {
            if options.cancel.is_cancelled() {
                return Ok(ModelStep::Cancelled);
            }
            match fragment? {
                AgentFragment::Text(piece) => {
                    if let Some(sink) = &options.fragments {
                        let _ = sink.send(piece.clone());
                    }
                    text.push_str(&piece);
                }
                AgentFragment::ToolCall(call) => match &tool_call {
                    None => tool_call = Some(call),
                    Some(kept) => tracing::warn!(
                        kept = %kept.name,
                        dropped = %call.name,
                        "model requested parallel tool calls, running the first"
                    ),
                },
            }
        }

        Ok(ModelStep::Reply(match tool_call {
            Some(call) => {
                if !text.trim().is_empty() {
                    tracing::debug!(discarded_len = text.len(), "dropping text streamed before tool call");
                }
                AgentReply::ToolCall(call)
            }
            None => AgentReply::Text(text),
        }))
    }

    fn cancelled(&self, mut turn: Turn) -> TurnOutcome {
        tracing::info!(
            chat_id = %turn.chat_id,
            kept = turn.output.len(),
            "turn cancelled"
        );
        let msg = Message::application_error(&turn.chat_id, CANCELLED_TEXT, self.app_role.clone());
        turn.emit(msg);
        TurnOutcome {
            messages: turn.output,
            model_requests: turn.model_requests,
            tool_calls: turn.tool_calls,
            cancelled: true,
            final_state: TurnState::Done,
        }
    }
}

/// Locals of one `run_turn` invocation.
struct Turn {
    chat_id: String,
    history: Vec<Message>,
    output: Vec<Message>,
    last_stamp: Option<DateTime<Utc>>,
    model_requests: u32,
    tool_calls: u32,
    pending: Option<AgentReply>,
    pending_call: Option<ToolCall>,
}

impl Turn {
    fn stamp(&mut self, msg: Message) -> Message {
        let msg = msg.stamped_after(self.last_stamp);
        self.last_stamp = Some(msg.created_at);
        msg
    }

    /// Append to the output only.
    fn emit(&mut self, msg: Message) {
        let msg = self.stamp(msg);
        self.output.push(msg);
    }

    /// Append to the output and to the history the next request sees.
    fn emit_to_history(&mut self, msg: Message) {
        let msg = self.stamp(msg);
        self.history.push(msg.clone());
        self.output.push(msg);
    }
}

fn provider_error_text(e: &ProviderError) -> String {
    match e {
        ProviderError::ConnectionFailed { .. } | ProviderError::Timeout { .. } => {
            format!("API Connection Error: {e}")
        }
        ProviderError::HttpError { status: 429, body } => format!("Rate Limit Exceeded: {body}"),
        ProviderError::HttpError { status, body } => format!("API Error {status}: {body}"),
        other => format!("Error: {other}"),
    }
}

fn tool_error_text(e: &ToolError) -> String {
    format!("Tool call failed: {e}")
}

fn limit_reached_text(max: u32) -> String {
    format!("Stopped after {max} chained tool call(s): the per-turn limit was reached.")
}
