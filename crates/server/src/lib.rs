//! The Ema server runtime: actor workers, the process-wide registry, and
//! job handlers that re-enter it.

pub mod jobs;
pub mod server;
pub mod worker;

pub use jobs::{ActorMessageHandler, ACTOR_MESSAGE_JOB};
pub use server::Server;
pub use worker::{ActorWorker, WorkerParams, MEMORY_BUFFER_TOKEN};
