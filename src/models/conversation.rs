use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message within a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Kind of attachment, used to build store keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    File,
    Image,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::File => "file",
            AttachmentKind::Image => "image",
        }
    }
}

/// Composite key addressing an attachment blob in the store.
/// Format: `{conversation_id}_{file|image}_{name}`.
pub fn attachment_key(conversation_id: &str, kind: AttachmentKind, name: &str) -> String {
    format!("{}_{}_{}", conversation_id, kind.as_str(), name)
}

/// A named file attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    /// Store key of the underlying blob
    pub id: String,
    /// Name, unique within the conversation's attachment namespace
    pub name: String,
    pub media_type: String,
    pub content: String,
}

impl FileRef {
    pub fn new(conversation_id: &str, name: &str, media_type: &str, content: String) -> Self {
        Self {
            id: attachment_key(conversation_id, AttachmentKind::File, name),
            name: name.to_string(),
            media_type: media_type.to_string(),
            content,
        }
    }
}

/// A named image attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Store key of the underlying blob
    pub id: String,
    /// Name, unique within the conversation's attachment namespace
    pub name: String,
    pub media_type: String,
    /// Image payload as a data URL or remote URL
    pub content: String,
}

impl ImageRef {
    pub fn new(conversation_id: &str, name: &str, media_type: &str, content: String) -> Self {
        Self {
            id: attachment_key(conversation_id, AttachmentKind::Image, name),
            name: name.to_string(),
            media_type: media_type.to_string(),
            content,
        }
    }
}

/// One entry of a search backend result page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerpEntry {
    pub title: String,
    pub link: String,
    pub snippet: String,
    #[serde(default)]
    pub favicon: Option<String>,
}

/// Raw structured results attached to a user message after a search turn.
/// Kept for display only; the message's literal text is never rewritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub content: String,
    #[serde(default)]
    pub serp: Vec<SerpEntry>,
}

/// A single finalized message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<SearchResults>,
}

impl Message {
    fn with_role(content: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            role,
            timestamp: Utc::now(),
            files: Vec::new(),
            images: Vec::new(),
            is_error: false,
            search_results: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(content.into(), Role::User)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(content.into(), Role::Assistant)
    }

    /// Terminal assistant message carrying an error notice.
    /// Error messages are never regenerated automatically.
    pub fn error(content: impl Into<String>) -> Self {
        let mut message = Self::with_role(content.into(), Role::Assistant);
        message.is_error = true;
        message
    }

    pub fn with_files(mut self, files: Vec<FileRef>) -> Self {
        self.files = files;
        self
    }

    pub fn with_images(mut self, images: Vec<ImageRef>) -> Self {
        self.images = images;
        self
    }
}

/// A single conversation with the model service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new, empty conversation
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            system_prompt: None,
            temperature: None,
            workspace_id: None,
            expert_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message and advance `updated_at`
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Advance the update timestamp; monotonic even under a coarse clock
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }

    pub fn message_index(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    /// Last user message, if any
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
