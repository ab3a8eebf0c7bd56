use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

use crate::repositories::attachment_store::AttachmentStore;
use crate::services::mention_resolver::{AttachmentIndex, mention_names};

use super::conversation::{AttachmentKind, Conversation, Role, attachment_key};

/// Result of `edit_message`, telling the caller whether a resubmission
/// turn is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// Assistant content replaced in place; no history change, no resubmission
    AssistantEdited,
    /// History truncated and the edited user message re-appended;
    /// the caller should resubmit
    UserEdited,
    NotFound,
}

/// Edit a message's text.
///
/// Assistant messages are cosmetic edits: content is replaced in place and
/// everything after it stays valid. Editing a user message invalidates the
/// replies that followed it, so the list is truncated to everything strictly
/// before the target and the edited message is appended, keeping its id and
/// attachments. Stale search results are dropped since they were derived
/// from the old text.
pub fn edit_message(
    conversation: &mut Conversation,
    message_id: &str,
    new_text: &str,
) -> EditOutcome {
    let Some(index) = conversation.message_index(message_id) else {
        return EditOutcome::NotFound;
    };

    match conversation.messages[index].role {
        Role::Assistant => {
            conversation.messages[index].content = new_text.to_string();
            conversation.touch();
            EditOutcome::AssistantEdited
        }
        Role::User => {
            let mut edited = conversation.messages[index].clone();
            edited.content = new_text.to_string();
            edited.search_results = None;
            edited.timestamp = Utc::now();

            conversation.messages.truncate(index);
            conversation.push_message(edited);
            EditOutcome::UserEdited
        }
    }
}

/// Truncate the conversation for a retry of `message_id`.
///
/// Scans backward from the target (inclusive) for the nearest user message
/// and truncates the list to end at it. Returns the index of that user
/// message, or `None` when no preceding user message exists, in which case
/// the conversation is left untouched.
pub fn retry_base(conversation: &mut Conversation, message_id: &str) -> Option<usize> {
    let index = conversation.message_index(message_id)?;
    let user_index = conversation.messages[..=index]
        .iter()
        .rposition(|m| m.role == Role::User)?;

    conversation.messages.truncate(user_index + 1);
    conversation.touch();
    Some(user_index)
}

/// Fork the prefix of a conversation up to and including `message_id` into
/// a new conversation.
///
/// Every attachment referenced in the prefix, directly or via `@mention`,
/// has its blob copied under the new conversation's key and the copied
/// messages' attachment ids rewritten to match. Blob copies are idempotent;
/// a key copied once is not written again. The original conversation is
/// not modified.
pub async fn split(
    conversation: &Conversation,
    message_id: &str,
    new_title: &str,
    store: &dyn AttachmentStore,
) -> Result<Conversation> {
    let index = conversation
        .message_index(message_id)
        .with_context(|| format!("split target {} not found", message_id))?;

    let mut forked = Conversation::new(new_title);
    forked.system_prompt = conversation.system_prompt.clone();
    forked.temperature = conversation.temperature;
    forked.workspace_id = conversation.workspace_id.clone();
    forked.expert_id = conversation.expert_id.clone();

    // Mentions may point at attachments carried by any message, not just
    // ones inside the prefix
    let full_index = AttachmentIndex::from_conversation(conversation);
    let mut copied: HashSet<String> = HashSet::new();

    for message in &conversation.messages[..=index] {
        let mut message = message.clone();

        for file in &mut message.files {
            let new_key = attachment_key(&forked.id, AttachmentKind::File, &file.name);
            copy_blob(store, &file.id, &new_key, &file.content, &mut copied).await?;
            file.id = new_key;
        }
        for image in &mut message.images {
            let new_key = attachment_key(&forked.id, AttachmentKind::Image, &image.name);
            copy_blob(store, &image.id, &new_key, &image.content, &mut copied).await?;
            image.id = new_key;
        }

        if message.role == Role::User {
            for name in mention_names(&message.content) {
                if let Some(content) = full_index.file_content(&name) {
                    let old_key =
                        attachment_key(&conversation.id, AttachmentKind::File, &name);
                    let new_key = attachment_key(&forked.id, AttachmentKind::File, &name);
                    copy_blob(store, &old_key, &new_key, content, &mut copied).await?;
                } else if let Some(image) = full_index.image(&name) {
                    let new_key = attachment_key(&forked.id, AttachmentKind::Image, &name);
                    copy_blob(store, &image.id, &new_key, &image.content, &mut copied).await?;
                }
            }
        }

        forked.messages.push(message);
    }

    debug!(
        source = %conversation.id,
        forked = %forked.id,
        messages = forked.messages.len(),
        blobs = copied.len(),
        "split conversation"
    );

    Ok(forked)
}

/// Copy one blob to its new conversation-scoped key, at most once.
/// Falls back to the inline ref content when the store has no entry
/// under the old key.
async fn copy_blob(
    store: &dyn AttachmentStore,
    old_key: &str,
    new_key: &str,
    inline_content: &str,
    copied: &mut HashSet<String>,
) -> Result<()> {
    if !copied.insert(new_key.to_string()) {
        return Ok(());
    }

    let content = match store.get(old_key).await? {
        Some(content) => content,
        None => inline_content.to_string(),
    };
    store.put(new_key, content).await?;
    Ok(())
}
