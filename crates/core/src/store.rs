//! Persistence traits — the document store and the stores built on top of it.
//!
//! The document store is mongo-shaped: schemaless JSON documents in named
//! collections, equality filters, and point-in-time snapshots. Backends are
//! selected by configuration; the in-process backend lives in `ema-store`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::message::BufferMessage;

/// The fixed, ordered set of collections a snapshot covers. Stable across
/// the process; snapshot and restore iterate this list in order.
pub const COLLECTIONS: [&str; 10] = [
    "roles",
    "actors",
    "users",
    "user_actor_relations",
    "conversations",
    "conversation_messages",
    "short_term_memories",
    "long_term_memories",
    "agenda",
    "util",
];

/// The collection holding scheduler jobs. The only collection whose ids are
/// opaque strings rather than integers.
pub const JOB_COLLECTION: &str = "agenda";

/// Sort order for a collection listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub ascending: bool,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// A store of JSON documents in named collections.
///
/// Every stored document carries `id` (integer for domain entities, opaque
/// string for jobs) and `createdAt` (Unix ms); the store assigns both on
/// first insert. Filters match documents whose fields equal every filter
/// field. All operations must be safe under concurrent invocation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a document. When `doc` has no `id`, one is
    /// assigned. Returns the stored document.
    async fn upsert_entity(&self, collection: &str, doc: Value) -> Result<Value, StoreError>;

    /// Delete a document by id. Returns whether it existed.
    async fn delete_entity(&self, collection: &str, id: &Value) -> Result<bool, StoreError>;

    /// List documents matching `filter`, optionally sorted and limited.
    async fn list_collection(
        &self,
        collection: &str,
        filter: &Value,
        limit: Option<usize>,
        sort: Option<SortSpec>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Declare an index. Advisory for backends that don't need one.
    async fn create_index(&self, collection: &str, spec: &Value) -> Result<(), StoreError>;

    /// Point-in-time dump of the named collections, in the given order.
    async fn snapshot_all(&self, names: &[&str]) -> Result<Value, StoreError>;

    /// Replace all collections with the given snapshot.
    async fn restore_all(&self, snapshot: Value) -> Result<(), StoreError>;
}

/// Ordered persistence of one conversation's turns.
///
/// `append` order is the persisted order; `recent` returns the newest
/// `limit` turns in forward time order.
#[async_trait]
pub trait ConversationBuffer: Send + Sync {
    async fn append(&self, message: &BufferMessage) -> Result<(), StoreError>;

    async fn recent(&self, limit: usize) -> Result<Vec<BufferMessage>, StoreError>;
}

/// A recalled memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: i64,
    pub content: String,
    /// Unix milliseconds
    pub created_at: i64,
    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f32,
}

/// A store of remembered facts for one actor, searchable by keyword.
///
/// Two instances back each worker: short-term (recent context) and
/// long-term (durable recall). Vector search sits behind an external
/// backend and is out of scope here.
#[async_trait]
pub trait MemoryArchive: Send + Sync {
    /// Persist one memory, returning its id.
    async fn add(&self, content: &str) -> Result<i64, StoreError>;

    /// Keyword search, best matches first.
    async fn search(&self, keywords: &[String], limit: usize)
        -> Result<Vec<MemoryItem>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_list_is_stable() {
        assert_eq!(COLLECTIONS.len(), 10);
        assert_eq!(COLLECTIONS[0], "roles");
        assert_eq!(COLLECTIONS[8], JOB_COLLECTION);
    }

    #[test]
    fn sort_spec_constructors() {
        let s = SortSpec::desc("time");
        assert_eq!(s.field, "time");
        assert!(!s.ascending);
    }
}
