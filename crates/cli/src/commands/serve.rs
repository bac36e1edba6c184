//! The `serve` command: HTTP gateway plus the job scheduler.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ema_core::{Error, Result};
use ema_scheduler::{JobHandler, Scheduler, SchedulerConfig};
use ema_server::{ActorMessageHandler, ACTOR_MESSAGE_JOB};
use tracing::info;

pub async fn run(config_path: &Path, port: u16) -> Result<()> {
    let config = super::load_config(config_path)?;
    let server = super::build_server(config)?;

    let scheduler = Scheduler::new(server.store(), SchedulerConfig::default());
    let mut handlers: HashMap<String, Arc<dyn JobHandler>> = HashMap::new();
    handlers.insert(
        ACTOR_MESSAGE_JOB.into(),
        Arc::new(ActorMessageHandler::new(server.clone())),
    );
    scheduler.start(handlers).await?;

    let router = ema_gateway::build_router(server);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Internal(format!("cannot bind {addr}: {e}")))?;

    info!(%addr, "Ema server listening");
    let result = axum::serve(listener, router)
        .await
        .map_err(|e| Error::Internal(format!("server failed: {e}")));

    scheduler.stop().await;
    result
}
