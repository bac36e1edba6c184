//! # Ema Core
//!
//! Domain types, traits, and error definitions for the Ema companion server.
//! This crate defines the domain model that all other crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod actor;
pub mod error;
pub mod event;
pub mod job;
pub mod llm;
pub mod message;
pub mod reply;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use actor::{ActorKey, ActorStatus};
pub use error::{Error, LlmError, Result, SchedulerError, StoreError, ToolError};
pub use event::{ActorEvent, AgentEvent, AgentEventSink, EventBus};
pub use job::{EverySpec, Interval, Job, JobSpec};
pub use llm::{GenerateRequest, LlmClient, LlmResponse};
pub use message::{now_ms, BufferKind, BufferMessage, Content, Message, ToolCall, ToolResult};
pub use reply::{EmaReply, ACTIONS, EXPRESSIONS, REPLY_TOOL_NAME};
pub use store::{
    ConversationBuffer, DocumentStore, MemoryArchive, MemoryItem, SortSpec, COLLECTIONS,
    JOB_COLLECTION,
};
pub use tool::{Tool, ToolContext, ToolDefinition, ToolRegistry};
