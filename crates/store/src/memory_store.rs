//! In-process document store — useful for testing and single-node runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use ema_core::{now_ms, DocumentStore, SortSpec, StoreError, COLLECTIONS, JOB_COLLECTION};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A document store holding every collection in process memory.
///
/// Documents keep their insertion order inside each collection; entity ids
/// are monotonically increasing integers, so sorting by `id` recovers
/// append order. Jobs get opaque string ids.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    indexes: RwLock<HashMap<String, Vec<Value>>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut collections = HashMap::new();
        for name in COLLECTIONS {
            collections.insert(name.to_string(), Vec::new());
        }
        Self {
            collections: RwLock::new(collections),
            indexes: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn check_collection(&self, name: &str) -> Result<(), StoreError> {
        if COLLECTIONS.contains(&name) {
            Ok(())
        } else {
            Err(StoreError::UnknownCollection(name.to_string()))
        }
    }

    fn assign_id(&self, collection: &str) -> Value {
        if collection == JOB_COLLECTION {
            Value::String(Uuid::new_v4().to_string())
        } else {
            Value::from(self.next_id.fetch_add(1, Ordering::SeqCst))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `doc` matches every field of `filter`. A null or empty filter
/// matches everything.
fn matches_filter(doc: &Value, filter: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::Object(fields) => fields
            .iter()
            .all(|(k, expected)| doc.get(k) == Some(expected)),
        _ => false,
    }
}

fn compare_field(a: &Value, b: &Value, field: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering as O;
    let av = a.get(field);
    let bv = b.get(field);
    match (av, bv) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(O::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => O::Greater,
        (None, Some(_)) => O::Less,
        _ => O::Equal,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert_entity(&self, collection: &str, mut doc: Value) -> Result<Value, StoreError> {
        self.check_collection(collection)?;
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| StoreError::Serialization("document must be an object".into()))?;

        if !obj.contains_key("id") || obj.get("id") == Some(&Value::Null) {
            obj.insert("id".into(), self.assign_id(collection));
        }
        if !obj.contains_key("createdAt") {
            obj.insert("createdAt".into(), Value::from(now_ms()));
        }
        let id = obj.get("id").cloned();

        let mut collections = self.collections.write().await;
        let docs = collections.get_mut(collection).expect("known collection");
        match docs.iter_mut().find(|d| d.get("id") == id.as_ref()) {
            Some(existing) => *existing = doc.clone(),
            None => docs.push(doc.clone()),
        }
        Ok(doc)
    }

    async fn delete_entity(&self, collection: &str, id: &Value) -> Result<bool, StoreError> {
        self.check_collection(collection)?;
        let mut collections = self.collections.write().await;
        let docs = collections.get_mut(collection).expect("known collection");
        let len_before = docs.len();
        docs.retain(|d| d.get("id") != Some(id));
        Ok(docs.len() < len_before)
    }

    async fn list_collection(
        &self,
        collection: &str,
        filter: &Value,
        limit: Option<usize>,
        sort: Option<SortSpec>,
    ) -> Result<Vec<Value>, StoreError> {
        self.check_collection(collection)?;
        let collections = self.collections.read().await;
        let docs = collections.get(collection).expect("known collection");

        let mut results: Vec<Value> = docs
            .iter()
            .filter(|d| matches_filter(d, filter))
            .cloned()
            .collect();

        if let Some(spec) = sort {
            results.sort_by(|a, b| {
                let ord = compare_field(a, b, &spec.field);
                if spec.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(n) = limit {
            results.truncate(n);
        }
        Ok(results)
    }

    async fn create_index(&self, collection: &str, spec: &Value) -> Result<(), StoreError> {
        self.check_collection(collection)?;
        self.indexes
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(spec.clone());
        Ok(())
    }

    async fn snapshot_all(&self, names: &[&str]) -> Result<Value, StoreError> {
        let collections = self.collections.read().await;
        let mut dump = Vec::with_capacity(names.len());
        for name in names {
            let docs = collections
                .get(*name)
                .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))?;
            dump.push(json!({
                "name": name,
                "documents": docs,
            }));
        }
        Ok(Value::Array(dump))
    }

    async fn restore_all(&self, snapshot: Value) -> Result<(), StoreError> {
        let entries = snapshot
            .as_array()
            .ok_or_else(|| StoreError::Serialization("snapshot must be an array".into()))?;

        let mut restored: HashMap<String, Vec<Value>> = HashMap::new();
        let mut max_id: i64 = 0;
        for entry in entries {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::Serialization("snapshot entry missing name".into()))?;
            self.check_collection(name)?;
            let docs = entry
                .get("documents")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for doc in &docs {
                if let Some(id) = doc.get("id").and_then(Value::as_i64) {
                    max_id = max_id.max(id);
                }
            }
            restored.insert(name.to_string(), docs);
        }

        let mut collections = self.collections.write().await;
        for name in COLLECTIONS {
            let docs = restored.remove(name).unwrap_or_default();
            collections.insert(name.to_string(), docs);
        }
        // Keep assigning ids above everything restored
        self.next_id.store(max_id + 1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_assigns_id_and_created_at() {
        let store = MemoryStore::new();
        let doc = store
            .upsert_entity("users", json!({"name": "Alice"}))
            .await
            .unwrap();
        assert!(doc.get("id").unwrap().is_i64());
        assert!(doc.get("createdAt").unwrap().is_i64());
    }

    #[tokio::test]
    async fn job_ids_are_strings() {
        let store = MemoryStore::new();
        let doc = store
            .upsert_entity("agenda", json!({"name": "ping"}))
            .await
            .unwrap();
        assert!(doc.get("id").unwrap().is_string());
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = MemoryStore::new();
        let doc = store
            .upsert_entity("users", json!({"name": "Alice"}))
            .await
            .unwrap();
        let id = doc.get("id").cloned().unwrap();

        let mut updated = doc.clone();
        updated["name"] = json!("Alicia");
        store.upsert_entity("users", updated).await.unwrap();

        let all = store
            .list_collection("users", &Value::Null, None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["name"], "Alicia");
        assert_eq!(all[0]["id"], id);
    }

    #[tokio::test]
    async fn filter_matches_all_fields() {
        let store = MemoryStore::new();
        store
            .upsert_entity("users", json!({"name": "Alice", "team": "a"}))
            .await
            .unwrap();
        store
            .upsert_entity("users", json!({"name": "Bob", "team": "a"}))
            .await
            .unwrap();

        let found = store
            .list_collection("users", &json!({"name": "Alice", "team": "a"}), None, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let team = store
            .list_collection("users", &json!({"team": "a"}), None, None)
            .await
            .unwrap();
        assert_eq!(team.len(), 2);
    }

    #[tokio::test]
    async fn sort_and_limit() {
        let store = MemoryStore::new();
        for t in [30, 10, 20] {
            store
                .upsert_entity("conversation_messages", json!({"time": t}))
                .await
                .unwrap();
        }

        let sorted = store
            .list_collection(
                "conversation_messages",
                &Value::Null,
                Some(2),
                Some(SortSpec::desc("time")),
            )
            .await
            .unwrap();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0]["time"], 30);
        assert_eq!(sorted[1]["time"], 20);
    }

    #[tokio::test]
    async fn delete_by_id() {
        let store = MemoryStore::new();
        let doc = store
            .upsert_entity("users", json!({"name": "Alice"}))
            .await
            .unwrap();
        let id = doc.get("id").cloned().unwrap();

        assert!(store.delete_entity("users", &id).await.unwrap());
        assert!(!store.delete_entity("users", &id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_collection_rejected() {
        let store = MemoryStore::new();
        let err = store
            .upsert_entity("ghosts", json!({"boo": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownCollection(_)));
    }

    #[tokio::test]
    async fn snapshot_restore_roundtrip() {
        let store = MemoryStore::new();
        store
            .upsert_entity("users", json!({"name": "Alice"}))
            .await
            .unwrap();
        store
            .upsert_entity("conversations", json!({"title": "chat"}))
            .await
            .unwrap();

        let names: Vec<&str> = COLLECTIONS.to_vec();
        let snapshot = store.snapshot_all(&names).await.unwrap();

        let restored = MemoryStore::new();
        restored.restore_all(snapshot).await.unwrap();

        let users = restored
            .list_collection("users", &Value::Null, None, None)
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["name"], "Alice");

        // New ids stay above restored ones
        let doc = restored
            .upsert_entity("users", json!({"name": "Bob"}))
            .await
            .unwrap();
        assert!(doc["id"].as_i64().unwrap() > users[0]["id"].as_i64().unwrap());
    }

    #[tokio::test]
    async fn snapshot_preserves_collection_order() {
        let store = MemoryStore::new();
        let names: Vec<&str> = COLLECTIONS.to_vec();
        let snapshot = store.snapshot_all(&names).await.unwrap();
        let arr = snapshot.as_array().unwrap();
        assert_eq!(arr.len(), COLLECTIONS.len());
        for (entry, name) in arr.iter().zip(COLLECTIONS) {
            assert_eq!(entry["name"], name);
        }
    }
}
