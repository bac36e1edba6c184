//! Actor identity and worker status types.

use serde::{Deserialize, Serialize};

/// The triple that identifies one actor worker: one AI persona driving one
/// conversation for one user. Equality on this key defines instance
/// uniqueness in the server registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorKey {
    pub user_id: i64,
    pub actor_id: i64,
    pub conversation_id: i64,
}

impl std::fmt::Display for ActorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.user_id, self.actor_id, self.conversation_id
        )
    }
}

/// Worker lifecycle state: `Idle → Preparing → Running → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorStatus {
    /// Waiting for input
    Idle,
    /// Draining the input queue and assembling run state
    Preparing,
    /// An agent run is in flight
    Running,
}

impl std::fmt::Display for ActorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorStatus::Idle => write!(f, "idle"),
            ActorStatus::Preparing => write!(f, "preparing"),
            ActorStatus::Running => write!(f, "running"),
        }
    }
}
