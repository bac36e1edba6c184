//! Storage backends for the Ema server.
//!
//! Implements the mongo-shaped [`DocumentStore`] contract with an
//! in-process backend, plus the conversation buffer and keyword memory
//! archives built on top of it.

pub mod archive;
pub mod conversation;
pub mod memory_store;

pub use archive::KeywordArchive;
pub use conversation::ConversationStore;
pub use memory_store::MemoryStore;

use std::sync::Arc;

use ema_config::MongoConfig;
use ema_core::{DocumentStore, Error};

/// Open the document store selected by configuration.
///
/// The `remote` kind is owned by an external adapter; selecting it without
/// one linked is a configuration error rather than a silent fallback.
pub fn open_store(config: &MongoConfig) -> Result<Arc<dyn DocumentStore>, Error> {
    match config.kind.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "remote" => Err(Error::Config {
            message: "mongo.kind = \"remote\" requires the external store adapter".into(),
        }),
        other => Err(Error::Config {
            message: format!("unknown mongo.kind: {other}"),
        }),
    }
}
