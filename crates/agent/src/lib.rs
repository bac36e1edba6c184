//! The agent reasoning loop implementation.
//!
//! One [`Agent::run`] call drives a bounded step-and-tool loop over a
//! [`RunContext`]: call the LLM, execute requested tools, feed results
//! back, until the model answers without tool calls or the step budget
//! runs out. Events go to the caller's sink synchronously, in emission
//! order.

pub mod context;

pub use context::RunContext;

use std::sync::Arc;

use ema_core::{
    AgentEvent, AgentEventSink, EmaReply, GenerateRequest, LlmClient, LlmError, Message,
    ToolResult, REPLY_TOOL_NAME,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct Agent {
    /// The chat client to use (retry policy lives inside it)
    llm: Arc<dyn LlmClient>,

    /// Maximum LLM calls per run
    max_steps: u32,

    /// Name of the distinguished reply tool
    reply_tool: String,
}

impl Agent {
    pub fn new(llm: Arc<dyn LlmClient>, max_steps: u32) -> Self {
        Self {
            llm,
            max_steps,
            reply_tool: REPLY_TOOL_NAME.into(),
        }
    }

    /// Override the reply tool name.
    pub fn with_reply_tool(mut self, name: impl Into<String>) -> Self {
        self.reply_tool = name.into();
        self
    }

    /// Execute one bounded run over `ctx`, mutating its message history.
    ///
    /// Termination is reported through the sink as a `RunFinished` event:
    /// success, abort, retry exhaustion, or step exhaustion. A generate
    /// error that is neither a cancellation nor retry exhaustion ends the
    /// run silently — callers keep their running status until their own
    /// drain loop moves on (preserved behavior of the original system).
    pub async fn run(&self, ctx: &mut RunContext, cancel: CancellationToken, sink: &dyn AgentEventSink) {
        info!(
            messages = ctx.messages.len(),
            max_steps = self.max_steps,
            "Starting agent run"
        );

        for step in 1..=self.max_steps {
            if cancel.is_cancelled() {
                self.finish_aborted(sink).await;
                return;
            }

            debug!(step, "Agent loop step");

            let request = GenerateRequest {
                messages: ctx.messages.clone(),
                tools: ctx.tools.definitions(),
                system_prompt: Some(ctx.system_prompt.clone()),
            };

            let response = match self.llm.generate(request, cancel.clone()).await {
                Ok(response) => response,
                Err(LlmError::Cancelled) => {
                    self.finish_aborted(sink).await;
                    return;
                }
                Err(e @ LlmError::RetryExhausted { .. }) => {
                    let msg = e.to_string();
                    self.finish(sink, false, msg.clone(), Some(msg)).await;
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Generation failed; run ends without a finished event");
                    return;
                }
            };

            let tool_calls = match &response.message {
                Message::Model { tool_calls, .. } => tool_calls.clone(),
                _ => vec![],
            };
            ctx.messages.push(response.message);

            if tool_calls.is_empty() {
                self.finish(sink, true, response.finish_reason, None).await;
                return;
            }

            for call in &tool_calls {
                if cancel.is_cancelled() {
                    self.finish_aborted(sink).await;
                    return;
                }

                let mut result = match ctx.tools.get(&call.name) {
                    None => {
                        warn!(tool = %call.name, "Model requested an unknown tool");
                        ToolResult::failure(format!("Unknown tool: {}", call.name))
                    }
                    Some(tool) => {
                        let execution = tool.execute(call.args.clone(), &ctx.tool_context);
                        let outcome = tokio::select! {
                            _ = cancel.cancelled() => {
                                self.finish_aborted(sink).await;
                                return;
                            }
                            r = execution => r,
                        };
                        match outcome {
                            Ok(result) => result,
                            Err(e) => {
                                warn!(tool = %call.name, error = ?e, "Tool execution failed");
                                ToolResult::failure(e.to_string())
                            }
                        }
                    }
                };

                if call.name == self.reply_tool && result.success {
                    result = self.deliver_reply(result, sink).await;
                }

                ctx.messages.push(Message::Tool {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    result,
                });
            }
        }

        self.finish(
            sink,
            false,
            format!("Task couldn't be completed after {} steps.", self.max_steps),
            None,
        )
        .await;
    }

    /// Parse a successful reply-tool result and publish it.
    ///
    /// The delivered reply is not kept in the stored tool message; a
    /// payload that fails validation turns the result into a failure the
    /// model can react to.
    async fn deliver_reply(&self, mut result: ToolResult, sink: &dyn AgentEventSink) -> ToolResult {
        let Some(content) = result.content.as_deref() else {
            return ToolResult::failure("reply tool returned no content");
        };
        match EmaReply::parse(content) {
            Ok(reply) => {
                sink.emit(AgentEvent::EmaReplyReceived { reply }).await;
                result.content = None;
                result
            }
            Err(e) => {
                error!(error = %e, "Reply payload failed validation");
                ToolResult::failure(format!("invalid reply payload: {e}"))
            }
        }
    }

    async fn finish(&self, sink: &dyn AgentEventSink, ok: bool, msg: String, error: Option<String>) {
        sink.emit(AgentEvent::RunFinished { ok, msg, error }).await;
    }

    async fn finish_aborted(&self, sink: &dyn AgentEventSink) {
        self.finish(sink, false, "Aborted".into(), None).await;
    }
}
