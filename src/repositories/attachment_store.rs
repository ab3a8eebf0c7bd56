use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::RepositoryResult;

/// Keyed blob store for attachment content.
///
/// Keys follow `{conversation_id}_{file|image}_{name}`; the store itself is
/// an external collaborator and knows nothing about conversations.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn get(&self, key: &str) -> RepositoryResult<Option<String>>;
    async fn put(&self, key: &str, content: String) -> RepositoryResult<()>;
    async fn contains(&self, key: &str) -> RepositoryResult<bool>;
}

/// Map-backed store, the default for tests and headless embedding
#[derive(Default)]
pub struct InMemoryAttachmentStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl InMemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

#[async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn get(&self, key: &str) -> RepositoryResult<Option<String>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, content: String) -> RepositoryResult<()> {
        self.blobs.lock().insert(key.to_string(), content);
        Ok(())
    }

    async fn contains(&self, key: &str) -> RepositoryResult<bool> {
        Ok(self.blobs.lock().contains_key(key))
    }
}
