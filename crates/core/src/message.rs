//! Message and conversation-buffer domain types.
//!
//! These are the core value objects that flow through the entire system:
//! a user sends contents → the actor worker queues them → the agent loop
//! exchanges messages with the LLM → replies are persisted as buffer messages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current wall-clock time in Unix milliseconds, the unit every persisted
/// timestamp uses.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A single piece of message content.
///
/// Only text is processed today. Other variants are accepted at the
/// boundary so clients get a validation error rather than a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    Image { url: String },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    /// Whether this content can be fed into the agent loop.
    pub fn is_text(&self) -> bool {
        matches!(self, Content::Text { .. })
    }

    /// The textual rendering of this content, empty for non-text variants.
    pub fn as_text(&self) -> &str {
        match self {
            Content::Text { text } => text,
            _ => "",
        }
    }
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON value
    pub args: serde_json::Value,

    /// Opaque provider-side reasoning signature, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// The outcome of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Output content on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Error description on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// A single message in an agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Sent by the end user
    User {
        contents: Vec<Content>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Generated by the model, possibly requesting tool calls
    Model {
        contents: Vec<Content>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },

    /// The result of one tool call, fed back to the model
    Tool {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        result: ToolResult,
    },
}

impl Message {
    /// Create a user message from a single text.
    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            contents: vec![Content::text(text)],
            name: None,
            id: None,
        }
    }

    /// Create a model message with plain text and no tool calls.
    pub fn model(text: impl Into<String>) -> Self {
        Message::Model {
            contents: vec![Content::text(text)],
            tool_calls: vec![],
        }
    }

    /// The concatenated text of this message's contents.
    pub fn text(&self) -> String {
        let contents = match self {
            Message::User { contents, .. } => contents,
            Message::Model { contents, .. } => contents,
            Message::Tool { result, .. } => {
                return result.content.clone().unwrap_or_default();
            }
        };
        contents
            .iter()
            .map(Content::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Who authored a persisted conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferKind {
    User,
    Actor,
}

/// A conversational turn enriched for persistence and recall: author
/// identity, a stable id, and a wall-clock timestamp.
///
/// Persisted order must match the order the owning worker observed the
/// turns; `time` alone is not assumed unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferMessage {
    pub kind: BufferKind,
    pub id: String,
    pub name: String,
    pub contents: Vec<Content>,
    /// Unix milliseconds
    pub time: i64,
}

impl BufferMessage {
    /// Wrap user-supplied contents into a buffer message.
    pub fn user(name: impl Into<String>, contents: Vec<Content>) -> Self {
        Self {
            kind: BufferKind::User,
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            contents,
            time: now_ms(),
        }
    }

    /// Wrap an actor reply into a buffer message.
    pub fn actor(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: BufferKind::Actor,
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            contents: vec![Content::text(text)],
            time: now_ms(),
        }
    }

    /// The concatenated text of the contents.
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .map(Content::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Convert into a user message for the agent loop.
    pub fn into_user_message(self) -> Message {
        Message::User {
            contents: self.contents,
            name: Some(self.name),
            id: Some(self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_text_roundtrip() {
        let c = Content::text("hello");
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"text\""));
        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn non_text_content_is_flagged() {
        let c = Content::Image { url: "x://y".into() };
        assert!(!c.is_text());
        assert_eq!(c.as_text(), "");
    }

    #[test]
    fn message_text_joins_contents() {
        let msg = Message::User {
            contents: vec![Content::text("a"), Content::text("b")],
            name: None,
            id: None,
        };
        assert_eq!(msg.text(), "ab");
    }

    #[test]
    fn buffer_message_carries_identity() {
        let m = BufferMessage::user("Alice", vec![Content::text("hi")]);
        assert_eq!(m.kind, BufferKind::User);
        assert_eq!(m.name, "Alice");
        assert!(!m.id.is_empty());
        assert!(m.time > 0);
    }

    #[test]
    fn buffer_to_user_message_keeps_name() {
        let m = BufferMessage::user("Alice", vec![Content::text("hi")]);
        let id = m.id.clone();
        match m.into_user_message() {
            Message::User { name, id: mid, .. } => {
                assert_eq!(name.as_deref(), Some("Alice"));
                assert_eq!(mid, Some(id));
            }
            _ => panic!("expected user message"),
        }
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::Model {
            contents: vec![Content::text("thinking")],
            tool_calls: vec![ToolCall {
                id: Some("call_1".into()),
                name: "ema_reply".into(),
                args: serde_json::json!({"response": "hi"}),
                thought_signature: None,
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        match back {
            Message::Model { tool_calls, .. } => assert_eq!(tool_calls[0].name, "ema_reply"),
            _ => panic!("expected model message"),
        }
    }
}
