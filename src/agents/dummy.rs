//! Offline agent for debugging and tests.
//!
//! By default it echoes the model-visible text of the last message. It can
//! also play back a scripted queue of replies (or failures), repeat one reply
//! forever, and stream its text in fixed-size pieces.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use super::{Agent, AgentFragment, AgentReply, FragmentStream, Model};
use crate::agent_core::types::{Message, Role};
use crate::inference::ProviderError;

pub struct DummyAgent {
    role: Role,
    script: Mutex<VecDeque<Result<AgentReply, ProviderError>>>,
    /// Played once the script runs dry, instead of echoing.
    repeat: Option<AgentReply>,
    /// Stream text in pieces of this many chars.
    stream_chunk_chars: Option<usize>,
    requests: AtomicUsize,
}

impl DummyAgent {
    /// Echo agent.
    pub fn echo(role: Role) -> Self {
        Self {
            role,
            script: Mutex::new(VecDeque::new()),
            repeat: None,
            stream_chunk_chars: None,
            requests: AtomicUsize::new(0),
        }
    }

    /// Play `steps` in order, then fall back to echoing.
    pub fn scripted(
        role: Role,
        steps: impl IntoIterator<Item = Result<AgentReply, ProviderError>>,
    ) -> Self {
        let agent = Self::echo(role);
        *agent.script.lock().unwrap_or_else(|e| e.into_inner()) = steps.into_iter().collect();
        agent
    }

    /// Return `reply` on every request.
    pub fn always(role: Role, reply: AgentReply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::echo(role)
        }
    }

    /// Advertise streaming and split text replies into `chunk_chars`-sized fragments.
    pub fn streaming(mut self, chunk_chars: usize) -> Self {
        self.stream_chunk_chars = Some(chunk_chars.max(1));
        self
    }

    /// Number of `request` / `request_streaming` calls so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn next_reply(&self, history: &[Message]) -> Result<AgentReply, ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(step) = scripted {
            return step;
        }
        if let Some(reply) = &self.repeat {
            return Ok(reply.clone());
        }

        let last = history
            .iter()
            .rev()
            .find(|m| m.is_model_visible())
            .and_then(|m| m.model_text())
            .unwrap_or_default();
        Ok(AgentReply::text(last))
    }
}

#[async_trait]
impl Agent for DummyAgent {
    fn model(&self) -> Model {
        Model::Dummy
    }

    fn role(&self) -> &Role {
        &self.role
    }

    fn supports_streaming(&self) -> bool {
        self.stream_chunk_chars.is_some()
    }

    async fn request(&self, history: &[Message]) -> Result<AgentReply, ProviderError> {
        self.next_reply(history)
    }

    async fn request_streaming(&self, history: &[Message]) -> Result<FragmentStream, ProviderError> {
        let reply = self.next_reply(history)?;
        let size = self.stream_chunk_chars.unwrap_or(usize::MAX);

        let fragments: Vec<Result<AgentFragment, ProviderError>> = match reply {
            AgentReply::Text(text) => {
                let chars: Vec<char> = text.chars().collect();
                chars
                    .chunks(size)
                    .map(|piece| Ok(AgentFragment::Text(piece.iter().collect())))
                    .collect()
            }
            AgentReply::ToolCall(call) => vec![Ok(AgentFragment::ToolCall(call))],
        };
        Ok(Box::pin(stream::iter(fragments)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn role() -> Role {
        Role::agent("Agent", "Dummy")
    }

    #[tokio::test]
    async fn test_echoes_last_visible_message() {
        let agent = DummyAgent::echo(role());
        let history = vec![
            Message::user_text("c1", "hello", Role::user("User")),
            Message::application_error("c1", "HTTP 500", Role::application("App")),
        ];
        assert_eq!(agent.request(&history).await.unwrap(), AgentReply::text("hello"));
        assert_eq!(agent.request_count(), 1);
    }

    #[tokio::test]
    async fn test_echo_uses_hidden_content() {
        let agent = DummyAgent::echo(role());
        let history = vec![Message::user_text("c1", "File Uploaded: a.md", Role::user("User"))
            .with_system_content("# A")];
        assert_eq!(agent.request(&history).await.unwrap(), AgentReply::text("# A"));
    }

    #[tokio::test]
    async fn test_script_then_echo() {
        let agent = DummyAgent::scripted(
            role(),
            [
                Ok(AgentReply::text("first")),
                Err(ProviderError::HttpError {
                    status: 429,
                    body: "slow down".into(),
                }),
            ],
        );
        let history = vec![Message::user_text("c1", "x", Role::user("User"))];
        assert_eq!(agent.request(&history).await.unwrap(), AgentReply::text("first"));
        assert!(agent.request(&history).await.is_err());
        assert_eq!(agent.request(&history).await.unwrap(), AgentReply::text("x"));
        assert_eq!(agent.request_count(), 3);
    }

    #[tokio::test]
    async fn test_streaming_splits_text() {
        let agent = DummyAgent::always(role(), AgentReply::text("héllo!")).streaming(2);
        assert!(agent.supports_streaming());
        let frags: Vec<_> = agent
            .request_streaming(&[])
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(
            frags,
            vec![
                AgentFragment::Text("hé".into()),
                AgentFragment::Text("ll".into()),
                AgentFragment::Text("o!".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_history_echoes_empty() {
        let agent = DummyAgent::echo(role());
        assert_eq!(agent.request(&[]).await.unwrap(), AgentReply::text(""));
    }
}
