//! Thread persistence contract and an in-memory implementation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::types::{Message, NewMessage, ThreadId};

/// Storage abstraction for thread messages.
///
/// Messages are append-only: the runtime never deletes or reorders them.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Append a message and return it with its assigned id and timestamp.
    async fn append(&self, thread_id: ThreadId, message: NewMessage)
        -> Result<Message, RuntimeError>;

    /// Messages the model should see, oldest first.
    async fn list_llm_visible_messages(
        &self,
        thread_id: ThreadId,
    ) -> Result<Vec<Message>, RuntimeError>;
}

/// Process-local store, useful for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryThreadStore {
    threads: RwLock<HashMap<ThreadId, Vec<Message>>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored message of a thread, including ones hidden from the model.
    pub fn all_messages(&self, thread_id: ThreadId) -> Vec<Message> {
        self.threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&thread_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn append(
        &self,
        thread_id: ThreadId,
        message: NewMessage,
    ) -> Result<Message, RuntimeError> {
        let stored = Message {
            id: Uuid::new_v4(),
            thread_id,
            kind: message.kind,
            content: message.content,
            is_llm_message: message.is_llm_message,
            metadata: message.metadata,
            created_at: Utc::now(),
        };
        self.threads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(thread_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_llm_visible_messages(
        &self,
        thread_id: ThreadId,
    ) -> Result<Vec<Message>, RuntimeError> {
        Ok(self
            .all_messages(thread_id)
            .into_iter()
            .filter(|m| m.is_llm_message)
            .collect())
    }
}
