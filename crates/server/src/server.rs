//! The server registry: owns every actor worker in the process.
//!
//! Workers are created lazily, at most once per key, and live until the
//! process exits. Concurrent lookups during creation await the one
//! in-flight construction instead of racing it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ema_config::EmaConfig;
use ema_core::{ActorKey, DocumentStore, LlmClient, Result, ToolRegistry, COLLECTIONS};
use ema_store::{ConversationStore, KeywordArchive};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::info;

use crate::worker::{ActorWorker, WorkerParams};

/// Name used for a worker whose user record is missing.
const FALLBACK_USER_NAME: &str = "User";

/// Name used for a worker whose actor record is missing.
const FALLBACK_ACTOR_NAME: &str = "Ema";

/// Process-wide owner of actor workers and their shared collaborators.
pub struct Server {
    config: Arc<EmaConfig>,
    store: Arc<dyn DocumentStore>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    system_prompt_template: String,
    actors: Mutex<HashMap<ActorKey, Arc<OnceCell<Arc<ActorWorker>>>>>,
}

impl Server {
    pub fn new(
        config: Arc<EmaConfig>,
        store: Arc<dyn DocumentStore>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        system_prompt_template: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            llm,
            tools,
            system_prompt_template,
            actors: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// Get or lazily create the worker for one actor key.
    ///
    /// Creation is single-flight per key: concurrent callers share one
    /// construction, and a failed construction leaves the slot empty so
    /// the next caller retries from scratch.
    pub async fn get_actor(
        &self,
        user_id: i64,
        actor_id: i64,
        conversation_id: i64,
    ) -> Result<Arc<ActorWorker>> {
        let key = ActorKey {
            user_id,
            actor_id,
            conversation_id,
        };

        let cell = {
            let mut actors = self.actors.lock().unwrap();
            actors
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let worker = cell
            .get_or_try_init(|| self.create_worker(key))
            .await?
            .clone();
        Ok(worker)
    }

    async fn create_worker(&self, key: ActorKey) -> Result<Arc<ActorWorker>> {
        let user_name = self
            .entity_name("users", key.user_id)
            .await?
            .unwrap_or_else(|| FALLBACK_USER_NAME.to_string());
        let actor_name = self
            .entity_name("actors", key.actor_id)
            .await?
            .unwrap_or_else(|| FALLBACK_ACTOR_NAME.to_string());

        // Make sure a conversation record exists without clobbering one
        let existing = self
            .store
            .list_collection(
                "conversations",
                &json!({"id": key.conversation_id}),
                Some(1),
                None,
            )
            .await?;
        if existing.is_empty() {
            self.store
                .upsert_entity(
                    "conversations",
                    json!({
                        "id": key.conversation_id,
                        "userId": key.user_id,
                        "actorId": key.actor_id,
                    }),
                )
                .await?;
        }

        info!(actor = %key, user = %user_name, "Creating actor worker");

        Ok(ActorWorker::spawn(WorkerParams {
            key,
            user_name,
            actor_name,
            conversation: Arc::new(ConversationStore::new(
                self.store.clone(),
                key.conversation_id,
            )),
            short_term: Arc::new(KeywordArchive::short_term(
                self.store.clone(),
                key.user_id,
                key.actor_id,
            )),
            long_term: Arc::new(KeywordArchive::long_term(
                self.store.clone(),
                key.user_id,
                key.actor_id,
            )),
            llm: self.llm.clone(),
            tools: self.tools.clone(),
            system_prompt_template: self.system_prompt_template.clone(),
            max_steps: self.config.agent.max_steps,
            memory_window: self.config.agent.memory_window,
        }))
    }

    async fn entity_name(&self, collection: &str, id: i64) -> Result<Option<String>> {
        let docs = self
            .store
            .list_collection(collection, &json!({"id": id}), Some(1), None)
            .await?;
        Ok(docs
            .first()
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Point-in-time dump of the fixed, ordered collection set.
    pub async fn snapshot(&self) -> Result<Value> {
        Ok(self.store.snapshot_all(&COLLECTIONS).await?)
    }

    /// Replace every collection with the given snapshot.
    pub async fn restore(&self, snapshot: Value) -> Result<()> {
        self.store.restore_all(snapshot).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let actors = self.actors.lock().unwrap();
        f.debug_struct("Server")
            .field("actors", &actors.len())
            .field("llm", &self.llm.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ema_core::{GenerateRequest, LlmError, LlmResponse, Message};
    use ema_store::MemoryStore;
    use tokio_util::sync::CancellationToken;

    struct TextClient;

    #[async_trait]
    impl LlmClient for TextClient {
        fn name(&self) -> &str {
            "text"
        }
        async fn generate(
            &self,
            _request: GenerateRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                message: Message::model("ok"),
                finish_reason: "stop".into(),
                total_tokens: None,
            })
        }
    }

    fn server_with(store: Arc<MemoryStore>) -> Arc<Server> {
        Server::new(
            Arc::new(EmaConfig::default()),
            store,
            Arc::new(TextClient),
            Arc::new(ToolRegistry::new()),
            "You are Ema.".into(),
        )
    }

    #[tokio::test]
    async fn same_key_returns_same_worker() {
        let server = server_with(Arc::new(MemoryStore::new()));
        let a = server.get_actor(1, 2, 3).await.unwrap();
        let b = server.get_actor(1, 2, 3).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn different_keys_get_different_workers() {
        let server = server_with(Arc::new(MemoryStore::new()));
        let a = server.get_actor(1, 2, 3).await.unwrap();
        let b = server.get_actor(1, 2, 4).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn concurrent_lookups_construct_once() {
        let store = Arc::new(MemoryStore::new());
        let server = server_with(store.clone());

        let lookups: Vec<_> = (0..16)
            .map(|_| {
                let server = server.clone();
                tokio::spawn(async move { server.get_actor(1, 2, 3).await.unwrap() })
            })
            .collect();

        let mut workers = Vec::new();
        for lookup in lookups {
            workers.push(lookup.await.unwrap());
        }
        for worker in &workers[1..] {
            assert!(Arc::ptr_eq(&workers[0], worker));
        }

        // The conversation record was upserted exactly once
        let conversations = store
            .list_collection("conversations", &json!({"id": 3}), None, None)
            .await
            .unwrap();
        assert_eq!(conversations.len(), 1);
    }

    #[tokio::test]
    async fn user_name_falls_back_when_missing() {
        let store = Arc::new(MemoryStore::new());
        let server = server_with(store.clone());
        let worker = server.get_actor(42, 2, 3).await.unwrap();

        // The fallback name shows up on queued user messages
        worker
            .work(vec![ema_core::Content::text("hi")])
            .await
            .unwrap();
        worker.flush_writes().await;
        let recent = worker_conversation(&store, 3).await;
        assert_eq!(recent[0]["name"], "User");
    }

    #[tokio::test]
    async fn user_name_loaded_from_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_entity("users", json!({"id": 42, "name": "Alice"}))
            .await
            .unwrap();
        let server = server_with(store.clone());
        let worker = server.get_actor(42, 2, 3).await.unwrap();

        worker
            .work(vec![ema_core::Content::text("hi")])
            .await
            .unwrap();
        worker.flush_writes().await;
        let recent = worker_conversation(&store, 3).await;
        assert_eq!(recent[0]["name"], "Alice");
    }

    #[tokio::test]
    async fn snapshot_restore_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_entity("users", json!({"id": 1, "name": "Alice"}))
            .await
            .unwrap();
        let server = server_with(store);

        let snapshot = server.snapshot().await.unwrap();

        let empty_store = Arc::new(MemoryStore::new());
        let restored = server_with(empty_store.clone());
        restored.restore(snapshot).await.unwrap();

        let users = empty_store
            .list_collection("users", &json!({"id": 1}), None, None)
            .await
            .unwrap();
        assert_eq!(users[0]["name"], "Alice");
    }

    async fn worker_conversation(store: &Arc<MemoryStore>, conversation_id: i64) -> Vec<Value> {
        store
            .list_collection(
                "conversation_messages",
                &json!({"conversationId": conversation_id}),
                None,
                None,
            )
            .await
            .unwrap()
    }
}
