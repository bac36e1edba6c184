//! Scheduler job handlers that re-enter the server.

use std::sync::Arc;

use async_trait::async_trait;
use ema_core::{Content, Job, SchedulerError};
use ema_scheduler::JobHandler;
use serde_json::Value;
use tracing::info;

use crate::server::Server;

/// Job name for delivering a deferred message to an actor.
pub const ACTOR_MESSAGE_JOB: &str = "actor_message";

/// Feeds a scheduled text back into the addressed actor worker, as if the
/// user had sent it. Job data: `{userId, actorId, conversationId, text}`.
pub struct ActorMessageHandler {
    server: Arc<Server>,
}

impl ActorMessageHandler {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    fn field(data: &Value, key: &str) -> Result<i64, SchedulerError> {
        data.get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| SchedulerError::HandlerFailed {
                name: ACTOR_MESSAGE_JOB.into(),
                reason: format!("job data missing integer field '{key}'"),
            })
    }
}

#[async_trait]
impl JobHandler for ActorMessageHandler {
    async fn run(&self, job: &Job) -> Result<(), SchedulerError> {
        let user_id = Self::field(&job.data, "userId")?;
        let actor_id = Self::field(&job.data, "actorId")?;
        let conversation_id = Self::field(&job.data, "conversationId")?;
        let text = job
            .data
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| SchedulerError::HandlerFailed {
                name: ACTOR_MESSAGE_JOB.into(),
                reason: "job data missing string field 'text'".into(),
            })?;

        info!(job = %job.id, user_id, actor_id, conversation_id, "Delivering scheduled message");

        let actor = self
            .server
            .get_actor(user_id, actor_id, conversation_id)
            .await
            .map_err(|e| SchedulerError::HandlerFailed {
                name: ACTOR_MESSAGE_JOB.into(),
                reason: e.to_string(),
            })?;

        actor
            .work(vec![Content::text(text)])
            .await
            .map_err(|e| SchedulerError::HandlerFailed {
                name: ACTOR_MESSAGE_JOB.into(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ema_core::now_ms;

    fn job_with(data: Value) -> Job {
        Job {
            id: "j1".into(),
            name: ACTOR_MESSAGE_JOB.into(),
            run_at: now_ms(),
            data,
            interval: None,
            unique: None,
            locked_at: None,
            last_run_at: None,
            failed_at: None,
            fail_reason: None,
            created_at: now_ms(),
        }
    }

    #[test]
    fn field_extraction_requires_integers() {
        let job = job_with(serde_json::json!({"userId": "not a number"}));
        let err = ActorMessageHandler::field(&job.data, "userId").unwrap_err();
        assert!(err.to_string().contains("userId"));
    }

    #[test]
    fn field_extraction_reads_integers() {
        let job = job_with(serde_json::json!({"userId": 7}));
        assert_eq!(ActorMessageHandler::field(&job.data, "userId").unwrap(), 7);
    }
}
