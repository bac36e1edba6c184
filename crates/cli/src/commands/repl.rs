//! The `repl` command: a terminal conversation with one actor.

use std::path::Path;

use ema_core::{ActorEvent, AgentEvent, Content, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub async fn run(config_path: &Path, user: i64, actor: i64, conversation: i64) -> Result<()> {
    let config = super::load_config(config_path)?;
    let server = super::build_server(config)?;
    let worker = server.get_actor(user, actor, conversation).await?;

    // Print replies and failures as they stream in
    let mut events = worker.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ActorEvent::Agent {
                    event: AgentEvent::EmaReplyReceived { reply },
                }) => {
                    println!("Ema [{} {}]: {}", reply.expression, reply.action, reply.response);
                }
                Ok(ActorEvent::Agent {
                    event: AgentEvent::RunFinished { ok: false, msg, .. },
                }) => {
                    println!("(run ended: {msg})");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    println!("Connected. Type a message, or /quit to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await.ok();
        stdout.flush().await.ok();
        let Ok(Some(line)) = lines.next_line().await else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = worker.work(vec![Content::text(line)]).await {
            println!("(rejected: {e})");
        }
    }

    Ok(())
}
