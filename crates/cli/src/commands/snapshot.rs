//! The `snapshot` and `restore` commands.

use std::path::Path;

use ema_core::{Error, Result};
use tracing::info;

pub async fn create(config_path: &Path, out: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    let server = super::build_server(config)?;

    let snapshot = server.snapshot().await?;
    let rendered = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(out, rendered).map_err(|e| Error::Internal(format!(
        "cannot write {}: {e}",
        out.display()
    )))?;

    info!(path = %out.display(), "Snapshot written");
    Ok(())
}

pub async fn restore(config_path: &Path, input: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    let server = super::build_server(config)?;

    let raw = std::fs::read_to_string(input).map_err(|e| Error::Internal(format!(
        "cannot read {}: {e}",
        input.display()
    )))?;
    let snapshot = serde_json::from_str(&raw)?;
    server.restore(snapshot).await?;

    info!(path = %input.display(), "Snapshot restored");
    Ok(())
}
