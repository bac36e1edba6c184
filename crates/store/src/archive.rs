//! Keyword memory archives over the document store.

use std::sync::Arc;

use async_trait::async_trait;
use ema_core::{now_ms, DocumentStore, MemoryArchive, MemoryItem, StoreError};
use serde_json::{json, Value};

/// A memory archive for one (user, actor) pair, stored in a named
/// collection and searched by keyword occurrence.
pub struct KeywordArchive {
    store: Arc<dyn DocumentStore>,
    collection: &'static str,
    user_id: i64,
    actor_id: i64,
}

impl KeywordArchive {
    pub fn short_term(store: Arc<dyn DocumentStore>, user_id: i64, actor_id: i64) -> Self {
        Self {
            store,
            collection: "short_term_memories",
            user_id,
            actor_id,
        }
    }

    pub fn long_term(store: Arc<dyn DocumentStore>, user_id: i64, actor_id: i64) -> Self {
        Self {
            store,
            collection: "long_term_memories",
            user_id,
            actor_id,
        }
    }

    fn scope(&self) -> Value {
        json!({"userId": self.user_id, "actorId": self.actor_id})
    }
}

/// Occurrences of any keyword, normalized by content length so short
/// focused memories outrank rambling ones.
fn score(content: &str, keywords: &[String]) -> f32 {
    let lower = content.to_lowercase();
    let occurrences: usize = keywords
        .iter()
        .map(|k| lower.matches(&k.to_lowercase()).count())
        .sum();
    occurrences as f32 / (content.len() as f32 / 100.0).max(1.0)
}

#[async_trait]
impl MemoryArchive for KeywordArchive {
    async fn add(&self, content: &str) -> Result<i64, StoreError> {
        let mut doc = self.scope();
        doc["content"] = Value::from(content);
        doc["createdAt"] = Value::from(now_ms());
        let stored = self.store.upsert_entity(self.collection, doc).await?;
        stored
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::Storage("store assigned a non-integer memory id".into()))
    }

    async fn search(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<MemoryItem>, StoreError> {
        let docs = self
            .store
            .list_collection(self.collection, &self.scope(), None, None)
            .await?;

        let mut items: Vec<MemoryItem> = docs
            .iter()
            .filter_map(|d| {
                let content = d.get("content")?.as_str()?;
                let s = score(content, keywords);
                if s <= 0.0 {
                    return None;
                }
                Some(MemoryItem {
                    id: d.get("id")?.as_i64()?,
                    content: content.to_string(),
                    created_at: d.get("createdAt").and_then(Value::as_i64).unwrap_or(0),
                    score: s,
                })
            })
            .collect();

        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items.truncate(limit);
        Ok(items)
    }
}
