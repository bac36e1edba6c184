//! Conversation buffer persistence over the document store.

use std::sync::Arc;

use async_trait::async_trait;
use ema_core::{BufferMessage, ConversationBuffer, DocumentStore, SortSpec, StoreError};
use serde_json::{json, Value};

const COLLECTION: &str = "conversation_messages";

/// Persists one conversation's buffer messages.
///
/// Each document keeps the buffer message's own uuid under `messageId`; the
/// store-assigned integer `id` grows monotonically, so sorting by it
/// recovers exact append order even when two turns share a timestamp.
pub struct ConversationStore {
    store: Arc<dyn DocumentStore>,
    conversation_id: i64,
}

impl ConversationStore {
    pub fn new(store: Arc<dyn DocumentStore>, conversation_id: i64) -> Self {
        Self {
            store,
            conversation_id,
        }
    }

    fn to_document(&self, message: &BufferMessage) -> Result<Value, StoreError> {
        let mut doc = serde_json::to_value(message)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let obj = doc.as_object_mut().expect("buffer message is an object");
        // The message uuid moves aside for the store-assigned integer id
        let message_id = obj.remove("id").unwrap_or(Value::Null);
        obj.insert("messageId".into(), message_id);
        obj.insert("conversationId".into(), Value::from(self.conversation_id));
        Ok(doc)
    }

    fn from_document(doc: &Value) -> Result<BufferMessage, StoreError> {
        let mut doc = doc.clone();
        if let Some(obj) = doc.as_object_mut() {
            let message_id = obj.remove("messageId").unwrap_or(Value::Null);
            obj.insert("id".into(), message_id);
        }
        serde_json::from_value(doc).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl ConversationBuffer for ConversationStore {
    async fn append(&self, message: &BufferMessage) -> Result<(), StoreError> {
        let doc = self.to_document(message)?;
        self.store.upsert_entity(COLLECTION, doc).await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<BufferMessage>, StoreError> {
        // Newest first to apply the limit, then reversed into forward order
        let docs = self
            .store
            .list_collection(
                COLLECTION,
                &json!({"conversationId": self.conversation_id}),
                Some(limit),
                Some(SortSpec::desc("id")),
            )
            .await?;

        let mut messages = docs
            .iter()
            .map(Self::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}
