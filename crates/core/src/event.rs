//! Typed event system — decoupled communication between bounded contexts.
//!
//! The agent loop and actor workers announce what happened through tagged
//! enums rather than string-keyed listener maps; subscribers receive events
//! over a broadcast channel and filter for what they care about.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::reply::EmaReply;

/// Events emitted by a single agent run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AgentEvent {
    /// The run terminated. Emitted exactly once per run that terminates
    /// normally (success, abort, retry exhaustion, or step limit).
    #[serde(rename_all = "camelCase")]
    RunFinished {
        ok: bool,
        msg: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The model delivered a user-visible reply through the reply tool.
    #[serde(rename_all = "camelCase")]
    EmaReplyReceived { reply: EmaReply },
}

/// Events published by an actor worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActorEvent {
    /// Human-readable status note (e.g. "Actor status: running.")
    Message { content: String },

    /// A forwarded agent event
    Agent { event: AgentEvent },
}

/// Receives agent events synchronously, in emission order, during a run.
///
/// The worker implements this to observe the run it owns before any
/// subscriber does: reply durability bookkeeping happens inside `emit`,
/// ahead of fan-out to the worker's event bus.
#[async_trait]
pub trait AgentEventSink: Send + Sync {
    async fn emit(&self, event: AgentEvent);
}

/// A broadcast-based bus for typed events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub: every
/// subscriber owns a bounded queue, so a slow subscriber lags and drops
/// instead of blocking publishers. Dropped deliveries are counted and
/// observable via [`EventBus::lag_count`].
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
    lagged: Arc<AtomicU64>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Create a new event bus with the given per-subscriber capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            lagged: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: E) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Record `n` deliveries dropped because a subscriber lagged.
    pub fn note_lagged(&self, n: u64) {
        self.lagged.fetch_add(n, Ordering::Relaxed);
    }

    /// Total deliveries dropped across all subscribers.
    pub fn lag_count(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(256)
    }
}
