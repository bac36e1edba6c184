//! The distinguished reply tool.
//!
//! Every user-visible reply flows through one call to this tool. The tool
//! itself only validates and echoes its arguments; the run loop parses the
//! successful result and publishes the reply event.

use async_trait::async_trait;
use ema_core::{
    EmaReply, Tool, ToolContext, ToolError, ToolResult, ACTIONS, EXPRESSIONS, REPLY_TOOL_NAME,
};
use serde_json::json;

pub struct ReplyTool;

#[async_trait]
impl Tool for ReplyTool {
    fn name(&self) -> &str {
        REPLY_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Deliver your reply to the user. Every user-visible answer must go through this tool."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "think": {
                    "type": "string",
                    "description": "Your private reasoning, never shown to the user"
                },
                "expression": {
                    "type": "string",
                    "enum": EXPRESSIONS,
                    "description": "Facial expression to display"
                },
                "action": {
                    "type": "string",
                    "enum": ACTIONS,
                    "description": "Body action to perform"
                },
                "response": {
                    "type": "string",
                    "description": "The text shown to the user"
                }
            },
            "required": ["think", "expression", "action", "response"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        // Validate before echoing so a malformed reply fails at the call
        // site instead of surfacing as a broken event later
        let payload = args.to_string();
        EmaReply::parse(&payload).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Ok(ToolResult::ok(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NullArchive;

    #[async_trait]
    impl ema_core::MemoryArchive for NullArchive {
        async fn add(&self, _content: &str) -> Result<i64, ema_core::StoreError> {
            Ok(0)
        }
        async fn search(
            &self,
            _keywords: &[String],
            _limit: usize,
        ) -> Result<Vec<ema_core::MemoryItem>, ema_core::StoreError> {
            Ok(vec![])
        }
    }

    fn ctx() -> ToolContext {
        let archive = Arc::new(NullArchive);
        ToolContext {
            user_id: 1,
            actor_id: 1,
            conversation_id: 1,
            user_name: "User".into(),
            short_term: archive.clone(),
            long_term: archive,
        }
    }

    #[tokio::test]
    async fn valid_reply_echoes_payload() {
        let args = json!({
            "think": "t", "expression": "普通", "action": "无", "response": "hi"
        });
        let result = ReplyTool.execute(args.clone(), &ctx()).await.unwrap();
        assert!(result.success);

        let reply = EmaReply::parse(result.content.as_deref().unwrap()).unwrap();
        assert_eq!(reply.response, "hi");
    }

    #[tokio::test]
    async fn invalid_expression_rejected() {
        let args = json!({
            "think": "t", "expression": "frown", "action": "无", "response": "hi"
        });
        let err = ReplyTool.execute(args, &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn schema_lists_vocabularies() {
        let schema = ReplyTool.parameters_schema();
        let expressions = schema["properties"]["expression"]["enum"].as_array().unwrap();
        assert_eq!(expressions.len(), EXPRESSIONS.len());
    }
}
