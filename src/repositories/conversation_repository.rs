use std::future::Future;
use std::pin::Pin;

use crate::models::conversation::Conversation;

use super::error::RepositoryResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Repository trait for conversation persistence.
///
/// The core hands over whole `Conversation` values at turn boundaries and
/// never touches storage directly.
pub trait ConversationRepository: Send + Sync + 'static {
    /// Load all conversations, newest first
    fn load_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<Conversation>>>;

    /// Load a single conversation by ID
    fn load_one(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Option<Conversation>>>;

    /// Persist a full conversation snapshot
    fn persist(&self, conversation: Conversation) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Delete a conversation from storage
    fn delete(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>>;
}
