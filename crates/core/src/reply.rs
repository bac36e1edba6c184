//! The structured reply object carried by the distinguished reply tool.
//!
//! The model delivers every user-visible reply through one tool call whose
//! arguments are this object. The run loop parses the successful tool result
//! back into an [`EmaReply`] and publishes it as an event; a payload that
//! fails validation never reaches subscribers.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Name of the distinguished reply tool. The run loop treats a successful
/// call to this tool as the user-visible reply.
pub const REPLY_TOOL_NAME: &str = "ema_reply";

/// Facial expressions the companion can display.
pub const EXPRESSIONS: [&str; 6] = ["普通", "开心", "难过", "生气", "害羞", "惊讶"];

/// Body actions the companion can perform.
pub const ACTIONS: [&str; 5] = ["无", "点头", "摇头", "挥手", "思考"];

/// A validated reply: inner monologue, presentation hints, and the text
/// shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaReply {
    pub think: String,
    pub expression: String,
    pub action: String,
    pub response: String,
}

impl EmaReply {
    /// Parse a reply from the JSON content of a tool result.
    ///
    /// Unknown `expression` or `action` values are rejected, as is any
    /// structural mismatch.
    pub fn parse(json: &str) -> Result<Self, Error> {
        let reply: EmaReply = serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("malformed reply payload: {e}")))?;
        reply.validate()?;
        Ok(reply)
    }

    fn validate(&self) -> Result<(), Error> {
        if !EXPRESSIONS.contains(&self.expression.as_str()) {
            return Err(Error::Validation(format!(
                "unknown expression: {}",
                self.expression
            )));
        }
        if !ACTIONS.contains(&self.action.as_str()) {
            return Err(Error::Validation(format!("unknown action: {}", self.action)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_reply() {
        let json = r#"{"think":"t","expression":"普通","action":"无","response":"hi"}"#;
        let reply = EmaReply::parse(json).unwrap();
        assert_eq!(reply.response, "hi");
        assert_eq!(reply.expression, "普通");
    }

    #[test]
    fn reject_unknown_expression() {
        let json = r#"{"think":"t","expression":"grin","action":"无","response":"hi"}"#;
        let err = EmaReply::parse(json).unwrap_err();
        assert!(err.to_string().contains("expression"));
    }

    #[test]
    fn reject_unknown_action() {
        let json = r#"{"think":"t","expression":"开心","action":"backflip","response":"hi"}"#;
        assert!(EmaReply::parse(json).is_err());
    }

    #[test]
    fn reject_missing_field() {
        let json = r#"{"think":"t","expression":"普通","action":"无"}"#;
        assert!(EmaReply::parse(json).is_err());
    }
}
