//! Per-run state: prompt, message history, tools, and tool context.

use std::sync::Arc;

use ema_core::{BufferMessage, Message, ToolContext, ToolRegistry};

/// Everything one agent run owns. Created per run and discarded at run end,
/// except when an aborted run is resumed: the worker then keeps the context
/// and appends the newly queued user messages.
pub struct RunContext {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Arc<ToolRegistry>,
    pub tool_context: ToolContext,
}

impl RunContext {
    pub fn new(
        system_prompt: String,
        batches: Vec<BufferMessage>,
        tools: Arc<ToolRegistry>,
        tool_context: ToolContext,
    ) -> Self {
        Self {
            system_prompt,
            messages: batches
                .into_iter()
                .map(BufferMessage::into_user_message)
                .collect(),
            tools,
            tool_context,
        }
    }

    /// Extend a resumed context with newly queued user inputs.
    ///
    /// The aborted run may have left a model message whose tool calls were
    /// never answered; that trailing exchange is dropped before the new
    /// inputs are appended so the model never sees a call without its
    /// result.
    pub fn append_user_messages(&mut self, batches: Vec<BufferMessage>) {
        self.repair_trailing_tool_calls();
        self.messages
            .extend(batches.into_iter().map(BufferMessage::into_user_message));
    }

    fn repair_trailing_tool_calls(&mut self) {
        let Some(pos) = self.messages.iter().rposition(
            |m| matches!(m, Message::Model { tool_calls, .. } if !tool_calls.is_empty()),
        ) else {
            return;
        };
        let expected = match &self.messages[pos] {
            Message::Model { tool_calls, .. } => tool_calls.len(),
            _ => return,
        };
        let answered = self.messages[pos + 1..]
            .iter()
            .filter(|m| matches!(m, Message::Tool { .. }))
            .count();
        if answered < expected {
            self.messages.truncate(pos);
        }
    }
}
