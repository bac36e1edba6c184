//! LLM client trait — the abstraction over chat backends.
//!
//! A client knows how to send a conversation to an LLM and get one model
//! message back. Wire adapters implement this trait; the agent loop calls
//! `generate()` without knowing which provider is behind it. Retry policy
//! is the client's concern, not the loop's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::message::Message;
use crate::tool::ToolDefinition;

/// One generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The conversation so far
    pub messages: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// System instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// A complete response from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated model message
    pub message: Message,

    /// Why generation stopped (e.g. "stop", "tool_calls", "length")
    pub finish_reason: String,

    /// Total tokens consumed, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

/// The core LLM client trait.
///
/// `cancel` is honored cooperatively: an in-flight call observing
/// cancellation returns [`LlmError::Cancelled`] promptly rather than
/// finishing the request.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A human-readable name for this client (e.g. "openai", "google").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<LlmResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_empty_fields() {
        let req = GenerateRequest {
            messages: vec![Message::user("hi")],
            tools: vec![],
            system_prompt: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("tools"));
        assert!(!json.contains("system_prompt"));
    }

    #[test]
    fn response_roundtrip() {
        let resp = LlmResponse {
            message: Message::model("hello"),
            finish_reason: "stop".into(),
            total_tokens: Some(12),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: LlmResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.finish_reason, "stop");
        assert_eq!(back.total_tokens, Some(12));
    }
}
