//! ConversationManager: the persisted side of a turn.
//!
//! Saves the user's message, runs the conversation loop over the chat's
//! ordered history with the agent for the chosen model, and saves what the
//! loop produced.

use std::sync::Arc;

use super::conversation_loop::{ConversationLoop, TurnOptions, TurnOutcome};
use super::database::MessageStore;
use super::errors::AgentError;
use super::types::{Message, Role};
use crate::agents::{AgentRegistry, Model};

pub struct ConversationManager {
    store: Arc<dyn MessageStore>,
    agents: Arc<AgentRegistry>,
    conversation_loop: ConversationLoop,
    user_role: Role,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn MessageStore>,
        agents: Arc<AgentRegistry>,
        conversation_loop: ConversationLoop,
        user_role: Role,
    ) -> Self {
        Self {
            store,
            agents,
            conversation_loop,
            user_role,
        }
    }

    pub fn user_role(&self) -> &Role {
        &self.user_role
    }

    /// Ordered history of a chat.
    pub fn history(&self, chat_id: &str) -> Result<Vec<Message>, AgentError> {
        self.store.load_history(chat_id)
    }

    /// Send a plain-text user message.
    pub async fn send(
        &self,
        chat_id: &str,
        text: &str,
        model: Model,
        options: &TurnOptions,
    ) -> Result<TurnOutcome, AgentError> {
        let message = Message::user_text(chat_id, text, self.user_role.clone());
        self.send_message(message, model, options).await
    }

    /// Send any user-side message (text, file contents, image) and run a turn.
    ///
    /// Everything the loop produced is saved in order, except the closing
    /// notice of a cancelled turn.
    pub async fn send_message(
        &self,
        message: Message,
        model: Model,
        options: &TurnOptions,
    ) -> Result<TurnOutcome, AgentError> {
        let mut history = self.store.load_history(&message.chat_id)?;
        let message = message.stamped_after(history.last().map(|m| m.created_at));
        self.store.save(&message)?;
        history.push(message);

        let agent = self.agents.get(model);
        let outcome = self
            .conversation_loop
            .run_turn(agent.as_ref(), history, options)
            .await;

        let keep = if outcome.cancelled {
            outcome.messages.len().saturating_sub(1)
        } else {
            outcome.messages.len()
        };
        for msg in &outcome.messages[..keep] {
            self.store.save(msg)?;
        }

        tracing::debug!(
            model = %model,
            saved = keep,
            cancelled = outcome.cancelled,
            "turn persisted"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::conversation_loop::{LoopConfig, CANCELLED_TEXT};
    use crate::agent_core::database::AgentDatabase;
    use crate::agent_core::types::{ContentType, MessageRole};
    use crate::agents::test_support::ListedTools;
    use crate::agents::{Agent, AgentReply, DummyAgent};
    use serde_json::json;

    fn manager(build: impl FnMut(Model) -> Arc<dyn Agent>) -> (ConversationManager, Arc<AgentDatabase>) {
        let db = Arc::new(AgentDatabase::open(":memory:").unwrap());
        let lp = ConversationLoop::new(
            Arc::new(ListedTools(vec![])),
            LoopConfig::default(),
            Role::application("App"),
        );
        let mgr = ConversationManager::new(
            db.clone(),
            Arc::new(AgentRegistry::from_fn(build)),
            lp,
            Role::user("User"),
        );
        (mgr, db)
    }

    fn echo(model: Model) -> Arc<dyn Agent> {
        Arc::new(DummyAgent::echo(Role::agent("Agent", model.id())))
    }

    #[tokio::test]
    async fn test_send_persists_user_and_reply() {
        let (mgr, db) = manager(echo);
        let chat = db.create_chat("Test").unwrap();

        let outcome = mgr
            .send(&chat.id, "hello", Model::Dummy, &TurnOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.messages.len(), 1);

        let history = mgr.history(&chat.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[0].content.as_deref(), Some("hello"));
        assert_eq!(history[1].role, MessageRole::Agent);
        assert_eq!(history[1].content.as_deref(), Some("hello"));
        assert_eq!(history[1].display_role.name, "Agent (Dummy)");
    }

    #[tokio::test]
    async fn test_turns_see_full_history_in_order() {
        let (mgr, db) = manager(echo);
        let chat = db.create_chat("Test").unwrap();
        let opts = TurnOptions::default();

        mgr.send(&chat.id, "first", Model::Dummy, &opts).await.unwrap();
        mgr.send(&chat.id, "second", Model::Gpt4o, &opts).await.unwrap();

        let contents: Vec<_> = mgr
            .history(&chat.id)
            .unwrap()
            .into_iter()
            .map(|m| m.content.unwrap_or_default())
            .collect();
        assert_eq!(contents, vec!["first", "first", "second", "second"]);
    }

    #[tokio::test]
    async fn test_error_messages_are_persisted_but_not_replayed() {
        let (mgr, db) = manager(|model| {
            Arc::new(DummyAgent::always(
                Role::agent("Agent", model.id()),
                AgentReply::tool_call("missing", json!({})),
            )) as Arc<dyn Agent>
        });
        let chat = db.create_chat("Test").unwrap();

        mgr.send(&chat.id, "hi", Model::Dummy, &TurnOptions::default())
            .await
            .unwrap();
        let history = mgr.history(&chat.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content_type, ContentType::Error);
        assert!(!history[1].is_model_visible());
    }

    #[tokio::test]
    async fn test_cancelled_turn_keeps_only_user_message() {
        let (mgr, db) = manager(echo);
        let chat = db.create_chat("Test").unwrap();
        let opts = TurnOptions::default();
        opts.cancel.cancel();

        let outcome = mgr.send(&chat.id, "hi", Model::Dummy, &opts).await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.messages.last().unwrap().content.as_deref(), Some(CANCELLED_TEXT));

        let history = mgr.history(&chat.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, MessageRole::User);
    }
}
