use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::conversation::{Conversation, ImageRef};

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)").expect("mention pattern is valid"));

/// Named attachments available for mention resolution.
///
/// File names map to their extracted text content; image names map to the
/// full `ImageRef` so resolved images can be attached as wire parts.
#[derive(Debug, Clone, Default)]
pub struct AttachmentIndex {
    files: BTreeMap<String, String>,
    images: BTreeMap<String, ImageRef>,
}

impl AttachmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gather every attachment referenced anywhere in the conversation
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let mut index = Self::new();
        for message in &conversation.messages {
            for file in &message.files {
                index.add_file(&file.name, &file.content);
            }
            for image in &message.images {
                index.add_image(image.clone());
            }
        }
        index
    }

    pub fn add_file(&mut self, name: &str, content: &str) {
        self.files.insert(name.to_string(), content.to_string());
    }

    pub fn add_image(&mut self, image: ImageRef) {
        self.images.insert(image.name.clone(), image);
    }

    pub fn file_content(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn image(&self, name: &str) -> Option<&ImageRef> {
        self.images.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.images.is_empty()
    }
}

/// Outcome of mention resolution over one piece of user text
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Wire text: the original text plus one inlined block per file mention.
    /// The stored message content is never mutated.
    pub expanded_text: String,
    /// Images referenced by mention, in order of first appearance
    pub resolved_images: Vec<ImageRef>,
}

/// Expand `@name` mentions against the attachment index.
///
/// Each distinct file mention appends a `"{name} (file):\n{content}"` block;
/// image mentions are collected, not inlined. Tokens matching nothing stay
/// as literal text.
pub fn resolve(text: &str, index: &AttachmentIndex) -> Resolution {
    let mut expanded_text = text.to_string();
    let mut resolved_images = Vec::new();
    let mut seen = Vec::new();

    for capture in MENTION_RE.captures_iter(text) {
        let name = &capture[1];
        if seen.iter().any(|s: &String| s == name) {
            continue;
        }
        seen.push(name.to_string());

        if let Some(content) = index.file_content(name) {
            expanded_text.push_str(&format!("\n\n{} (file):\n{}", name, content));
        } else if let Some(image) = index.image(name) {
            resolved_images.push(image.clone());
        }
    }

    Resolution {
        expanded_text,
        resolved_images,
    }
}

/// Distinct `@name` tokens in order of first appearance
pub fn mention_names(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in MENTION_RE.captures_iter(text) {
        let name = &capture[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Whether any `@name` token in the text resolves against the index.
/// Mentions take precedence over the search sub-protocol.
pub fn has_resolvable_mentions(text: &str, index: &AttachmentIndex) -> bool {
    MENTION_RE.captures_iter(text).any(|capture| {
        let name = &capture[1];
        index.file_content(name).is_some() || index.image(name).is_some()
    })
}
