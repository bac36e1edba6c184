//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what let the model act: deliver a reply, search memories,
//! store a fact. Tools are registered in the ToolRegistry and made
//! available to the agent run loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::message::ToolResult;
use crate::store::MemoryArchive;

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Per-run context handed to every tool execution: who the run belongs to
/// and the stores a tool may touch.
#[derive(Clone)]
pub struct ToolContext {
    pub user_id: i64,
    pub actor_id: i64,
    pub conversation_id: i64,
    pub user_name: String,
    pub short_term: Arc<dyn MemoryArchive>,
    pub long_term: Arc<dyn MemoryArchive>,
}

/// The core Tool trait.
///
/// Each tool implements this trait and is looked up by name when the model
/// requests it. Execution errors are the caller's to package; a tool that
/// fails cleanly should prefer returning a failure [`ToolResult`] over an
/// `Err`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "ema_reply", "memory_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The run loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up and execute tools when the LLM requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryItem;

    struct NullArchive;

    #[async_trait]
    impl MemoryArchive for NullArchive {
        async fn add(&self, _content: &str) -> Result<i64, StoreError> {
            Ok(0)
        }
        async fn search(
            &self,
            _keywords: &[String],
            _limit: usize,
        ) -> Result<Vec<MemoryItem>, StoreError> {
            Ok(vec![])
        }
    }

    pub(crate) fn test_context() -> ToolContext {
        ToolContext {
            user_id: 1,
            actor_id: 1,
            conversation_id: 1,
            user_name: "User".into(),
            short_term: Arc::new(NullArchive),
            long_term: Arc::new(NullArchive),
        }
    }

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            let text = args["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::ok(text))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[tokio::test]
    async fn execute_echo_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let ctx = test_context();
        let tool = registry.get("echo").unwrap();
        let result = tool
            .execute(serde_json::json!({"text": "hello world"}), &ctx)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.content.as_deref(), Some("hello world"));
    }
}
