//! Long-term memory search tool.

use async_trait::async_trait;
use ema_core::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_LIMIT: usize = 5;

pub struct MemorySearchTool;

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search your long-term memories about this user by keywords."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "keywords": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Keywords to search for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results to return (default 5)"
                }
            },
            "required": ["keywords"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let keywords: Vec<String> = args
            .get("keywords")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if keywords.is_empty() {
            return Err(ToolError::InvalidArguments(
                "keywords must be a non-empty array of strings".into(),
            ));
        }
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let items = ctx
            .long_term
            .search(&keywords, limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "memory_search".into(),
                reason: e.to_string(),
            })?;

        debug!(count = items.len(), "Memory search completed");

        let rendered = json!({
            "items": items.iter().map(|m| json!({
                "id": m.id,
                "content": m.content,
                "createdAt": m.created_at,
            })).collect::<Vec<_>>(),
        });
        Ok(ToolResult::ok(rendered.to_string()))
    }
}
