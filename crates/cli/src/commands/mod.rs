//! CLI command implementations.

pub mod repl;
pub mod serve;
pub mod snapshot;

use std::path::Path;
use std::sync::Arc;

use ema_config::EmaConfig;
use ema_core::{Error, Result};
use ema_server::Server;

/// Prompt used when no system prompt file is configured on disk.
const DEFAULT_SYSTEM_PROMPT: &str = "You are Ema, a personal companion. \
Reply to the user through the ema_reply tool.\n\n\
Recent conversation:\n{MEMORY_BUFFER}\n";

/// Load configuration: the file when present, defaults plus environment
/// overrides otherwise.
pub fn load_config(path: &Path) -> Result<EmaConfig> {
    if path.exists() {
        EmaConfig::load(path)
    } else {
        let mut config = EmaConfig::default();
        config.apply_env(&std::env::vars().collect());
        config.validate()?;
        Ok(config)
    }
}

/// Build the full server from configuration.
pub fn build_server(config: EmaConfig) -> Result<Arc<Server>> {
    let store = ema_store::open_store(&config.mongo)?;
    let llm = ema_llm::build_client(&config)?;
    let tools = ema_tools::build_registry(&config.tools);

    let system_prompt = match std::fs::read_to_string(&config.agent.system_prompt_file) {
        Ok(prompt) => prompt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(
                file = %config.agent.system_prompt_file.display(),
                "System prompt file not found, using the built-in default"
            );
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            return Err(Error::Config {
                message: format!(
                    "cannot read {}: {e}",
                    config.agent.system_prompt_file.display()
                ),
            })
        }
    };

    Ok(Server::new(
        Arc::new(config),
        store,
        llm,
        Arc::new(tools),
        system_prompt,
    ))
}
