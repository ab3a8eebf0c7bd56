use std::path::PathBuf;

use crate::models::conversation::Conversation;

use super::conversation_repository::{BoxFuture, ConversationRepository};
use super::error::{RepositoryError, RepositoryResult};

/// JSON file-based repository for conversations.
/// Stores each conversation as a separate file under the config directory.
pub struct ConversationJsonRepository {
    conversations_dir: PathBuf,
}

impl ConversationJsonRepository {
    pub fn new() -> RepositoryResult<Self> {
        let conversations_dir = dirs::config_dir()
            .ok_or_else(|| RepositoryError::Initialization {
                message: "Could not determine config directory".to_string(),
            })?
            .join("palaver")
            .join("conversations");

        Ok(Self { conversations_dir })
    }

    /// Repository rooted at an explicit directory (tests, portable installs)
    pub fn with_dir(conversations_dir: PathBuf) -> Self {
        Self { conversations_dir }
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        self.conversations_dir.join(format!("{}.json", id))
    }
}

impl ConversationRepository for ConversationJsonRepository {
    fn load_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<Conversation>>> {
        let conversations_dir = self.conversations_dir.clone();

        Box::pin(async move {
            tokio::fs::create_dir_all(&conversations_dir).await?;

            let mut conversations = Vec::new();
            let mut entries = tokio::fs::read_dir(&conversations_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) == Some("json") {
                    let content = tokio::fs::read_to_string(&path).await?;
                    let conversation: Conversation = serde_json::from_str(&content)?;
                    conversations.push(conversation);
                }
            }

            // Newest first
            conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

            Ok(conversations)
        })
    }

    fn load_one(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Option<Conversation>>> {
        let path = self.conversation_path(id);

        Box::pin(async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn persist(&self, conversation: Conversation) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.conversation_path(&conversation.id);
        let conversations_dir = self.conversations_dir.clone();

        Box::pin(async move {
            tokio::fs::create_dir_all(&conversations_dir).await?;

            let json = serde_json::to_string_pretty(&conversation)?;

            // Atomic write: temp file, then rename
            let temp_path = path.with_extension("json.tmp");
            tokio::fs::write(&temp_path, json).await?;
            tokio::fs::rename(&temp_path, &path).await?;

            Ok(())
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.conversation_path(id);

        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::Message;

    #[tokio::test]
    async fn test_persist_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let repository = ConversationJsonRepository::with_dir(tmp.path().to_path_buf());

        let mut conversation = Conversation::new("Persisted");
        conversation.push_message(Message::user("hello"));
        conversation.push_message(Message::assistant("hi"));
        let id = conversation.id.clone();

        repository.persist(conversation.clone()).await.unwrap();

        let loaded = repository.load_one(&id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Persisted");
        assert_eq!(loaded.messages.len(), 2);

        let all = repository.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_load_all_sorted_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let repository = ConversationJsonRepository::with_dir(tmp.path().to_path_buf());

        let older = Conversation::new("Older");
        let mut newer = Conversation::new("Newer");
        newer.touch();

        repository.persist(older).await.unwrap();
        repository.persist(newer).await.unwrap();

        let all = repository.load_all().await.unwrap();
        assert_eq!(all[0].title, "Newer");
        assert_eq!(all[1].title, "Older");
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let repository = ConversationJsonRepository::with_dir(tmp.path().to_path_buf());
        repository.delete("absent").await.unwrap();
        assert!(repository.load_one("absent").await.unwrap().is_none());
    }
}
