//! Long-term memory write tool.

use async_trait::async_trait;
use ema_core::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::{json, Value};

pub struct RememberTool;

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Store a fact about this user in your long-term memory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The fact to remember"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ToolError::InvalidArguments("content must be a non-empty string".into())
            })?;

        let id = ctx
            .long_term
            .add(content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "remember".into(),
                reason: e.to_string(),
            })?;

        Ok(ToolResult::ok(json!({"id": id}).to_string()))
    }
}
