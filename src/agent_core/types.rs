//! Shared types for the agent core.
//!
//! `Message` is the unit of conversation history: created once (by user
//! input, by an agent reply, or by the conversation loop wrapping a tool
//! result) and never mutated afterwards.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Message Role ───────────────────────────────────────────────────────────

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
    System,
    Application,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
            Self::Application => "application",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "agent" => Some(Self::Agent),
            "system" => Some(Self::System),
            "application" => Some(Self::Application),
            _ => None,
        }
    }
}

// ─── Content Type ───────────────────────────────────────────────────────────

/// Payload discriminator.
///
/// `Png`/`Jpeg` messages carry base64 image data in `system_content` and a
/// caption in `content`. `ToolResult` is internal augmentation produced by
/// the loop. `Error` messages are shown to the user but never sent back to
/// a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    OcrText,
    Png,
    Jpeg,
    ToolResult,
    Error,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::OcrText => "ocr_text",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::ToolResult => "tool_result",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "ocr_text" => Some(Self::OcrText),
            "png" => Some(Self::Png),
            "jpeg" => Some(Self::Jpeg),
            "tool_result" => Some(Self::ToolResult),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// MIME type for image payloads.
    pub fn image_media_type(&self) -> Option<&'static str> {
        match self {
            Self::Png => Some("image/png"),
            Self::Jpeg => Some("image/jpeg"),
            _ => None,
        }
    }
}

// ─── Display Role ───────────────────────────────────────────────────────────

/// Display identity attached to a message. Presentation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub color: String,
}

impl Role {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }

    pub fn user(name: &str) -> Self {
        Self::new(name, "green")
    }

    /// `"Agent (gpt-4o-mini)"`.
    pub fn agent(agent_name: &str, model_id: &str) -> Self {
        Self::new(format!("{agent_name} ({model_id})"), "blue")
    }

    pub fn application(name: &str) -> Self {
        Self::new(name, "grey")
    }

    pub fn system() -> Self {
        Self::new("System", "grey")
    }
}

// ─── Tool Call Record ───────────────────────────────────────────────────────

/// The tool call a tool-result message answers.
///
/// Carried on the result message so later requests can replay the
/// call/result pair in each provider's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

// ─── Message ────────────────────────────────────────────────────────────────

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub chat_id: String,
    pub role: MessageRole,
    pub content_type: ContentType,
    /// Text rendered in the chat view.
    pub content: Option<String>,
    /// Hidden payload for the model (file contents, OCR text, image data).
    pub system_content: Option<String>,
    pub display_role: Role,
    pub tool_call: Option<ToolCallRecord>,
}

impl Message {
    pub fn new(
        chat_id: &str,
        role: MessageRole,
        content_type: ContentType,
        content: Option<String>,
        display_role: Role,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now(),
            chat_id: chat_id.to_string(),
            role,
            content_type,
            content,
            system_content: None,
            display_role,
            tool_call: None,
        }
    }

    pub fn user_text(chat_id: &str, text: impl Into<String>, display_role: Role) -> Self {
        Self::new(chat_id, MessageRole::User, ContentType::Text, Some(text.into()), display_role)
    }

    pub fn agent_text(chat_id: &str, text: impl Into<String>, display_role: Role) -> Self {
        Self::new(chat_id, MessageRole::Agent, ContentType::Text, Some(text.into()), display_role)
    }

    pub fn system_text(chat_id: &str, text: impl Into<String>) -> Self {
        Self::new(chat_id, MessageRole::System, ContentType::Text, Some(text.into()), Role::system())
    }

    /// Application-role error or notice. Never fed back to a model.
    pub fn application_error(chat_id: &str, text: impl Into<String>, display_role: Role) -> Self {
        Self::new(
            chat_id,
            MessageRole::Application,
            ContentType::Error,
            Some(text.into()),
            display_role,
        )
    }

    /// Result of a tool call, recorded alongside the call itself.
    pub fn tool_result(
        chat_id: &str,
        call: ToolCallRecord,
        result: impl Into<String>,
        display_role: Role,
    ) -> Self {
        let mut msg = Self::new(
            chat_id,
            MessageRole::Application,
            ContentType::ToolResult,
            Some(result.into()),
            display_role,
        );
        msg.tool_call = Some(call);
        msg
    }

    pub fn with_system_content(mut self, system_content: impl Into<String>) -> Self {
        self.system_content = Some(system_content.into());
        self
    }

    /// Re-stamp so this message sorts strictly after `previous`.
    pub fn stamped_after(mut self, previous: Option<DateTime<Utc>>) -> Self {
        self.created_at = next_timestamp(previous);
        self
    }

    /// Text the model should see: hidden `system_content` when present,
    /// otherwise the displayed `content`.
    pub fn model_text(&self) -> Option<&str> {
        self.system_content.as_deref().or(self.content.as_deref())
    }

    /// Whether this message belongs in the next model request.
    pub fn is_model_visible(&self) -> bool {
        self.content_type != ContentType::Error
    }

    pub fn is_tool_result(&self) -> bool {
        self.content_type == ContentType::ToolResult
    }
}

// ─── Chat ───────────────────────────────────────────────────────────────────

/// A conversation, grouping messages by `chat_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
}

// ─── Timestamps ─────────────────────────────────────────────────────────────

/// Current time at the microsecond precision messages are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// `now()`, bumped past `previous` if the clock has not moved on.
pub fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [
            MessageRole::User,
            MessageRole::Agent,
            MessageRole::System,
            MessageRole::Application,
        ] {
            assert_eq!(MessageRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::parse("assistant"), None);
    }

    #[test]
    fn test_content_type_parse() {
        assert_eq!(ContentType::parse("ocr_text"), Some(ContentType::OcrText));
        assert_eq!(ContentType::parse("tool_result"), Some(ContentType::ToolResult));
        assert_eq!(ContentType::parse("gif"), None);
        assert_eq!(ContentType::Png.image_media_type(), Some("image/png"));
        assert_eq!(ContentType::Text.image_media_type(), None);
    }

    #[test]
    fn test_agent_role_display_name() {
        let role = Role::agent("Agent", "gpt-4o-mini");
        assert_eq!(role.name, "Agent (gpt-4o-mini)");
    }

    #[test]
    fn test_model_text_prefers_system_content() {
        let msg = Message::user_text("c1", "File Uploaded: notes.md", Role::user("User"))
            .with_system_content("# Notes");
        assert_eq!(msg.model_text(), Some("# Notes"));

        let plain = Message::user_text("c1", "hi", Role::user("User"));
        assert_eq!(plain.model_text(), Some("hi"));
    }

    #[test]
    fn test_error_messages_are_not_model_visible() {
        let err = Message::application_error("c1", "HTTP 500", Role::application("App"));
        assert!(!err.is_model_visible());
        assert_eq!(err.role, MessageRole::Application);
    }

    #[test]
    fn test_tool_result_carries_call() {
        let call = ToolCallRecord {
            id: "call_1".into(),
            name: "fs__read_file".into(),
            arguments: serde_json::json!({"path": "X"}),
        };
        let msg = Message::tool_result("c1", call.clone(), "contents...", Role::application("App"));
        assert!(msg.is_tool_result());
        assert!(msg.is_model_visible());
        assert_eq!(msg.tool_call, Some(call));
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        let far_future = now() + Duration::seconds(60);
        let bumped = next_timestamp(Some(far_future));
        assert_eq!(bumped, far_future + Duration::microseconds(1));

        let mut prev = None;
        for _ in 0..100 {
            let ts = next_timestamp(prev);
            if let Some(p) = prev {
                assert!(ts > p);
            }
            prev = Some(ts);
        }
    }

    #[test]
    fn test_new_messages_get_unique_ids() {
        let a = Message::user_text("c1", "a", Role::user("User"));
        let b = Message::user_text("c1", "a", Role::user("User"));
        assert_ne!(a.id, b.id);
    }
}
