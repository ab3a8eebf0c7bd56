use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::conversation::Conversation;

use super::conversation_repository::{BoxFuture, ConversationRepository};
use super::error::RepositoryResult;

/// In-memory repository, used as a test double and for ephemeral sessions.
#[derive(Default, Clone)]
pub struct InMemoryConversationRepository {
    conversations: Arc<Mutex<HashMap<String, Conversation>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.lock().is_empty()
    }
}

impl ConversationRepository for InMemoryConversationRepository {
    fn load_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<Conversation>>> {
        let conversations = self.conversations.clone();
        Box::pin(async move {
            let mut all: Vec<Conversation> = conversations.lock().values().cloned().collect();
            all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(all)
        })
    }

    fn load_one(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Option<Conversation>>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();
        Box::pin(async move { Ok(conversations.lock().get(&id).cloned()) })
    }

    fn persist(&self, conversation: Conversation) -> BoxFuture<'static, RepositoryResult<()>> {
        let conversations = self.conversations.clone();
        Box::pin(async move {
            conversations
                .lock()
                .insert(conversation.id.clone(), conversation);
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();
        Box::pin(async move {
            conversations.lock().remove(&id);
            Ok(())
        })
    }
}
