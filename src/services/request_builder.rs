use serde::Serialize;

use crate::models::conversation::{Conversation, Message, Role};
use crate::services::mention_resolver::{self, AttachmentIndex};

/// Endpoint-native web search mode, sent only when the endpoint supports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    WebOn,
    WebOff,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One typed part of a multi-part wire message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Content of a wire message: plain text or an ordered part list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

/// Outgoing projection of a message. Derived and ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: WireContent,
}

impl WireMessage {
    pub fn system(content: String) -> Self {
        Self {
            role: "system",
            content: WireContent::Text(content),
        }
    }

    pub fn text(role: Role, content: String) -> Self {
        Self {
            role: match role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: WireContent::Text(content),
        }
    }
}

/// Flat request payload for the inference endpoint.
/// `messages` is the ordered wire-message list.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<RequestType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub stream: bool,
}

/// Per-turn inputs the builder folds into the request.
/// Assembled by the turn controller from settings, endpoint and conversation.
#[derive(Debug, Clone, Default)]
pub struct TurnParams {
    pub model: String,
    pub stream: bool,
    /// Current-date line content, present only when date injection is on
    pub current_date: Option<String>,
    pub workspace_instructions: Option<String>,
    pub expert_instructions: Option<String>,
    /// Tone instructions; ignored when expert instructions are present
    pub tone: Option<String>,
    pub temperature: Option<f32>,
    pub request_type: Option<RequestType>,
    pub session_token: Option<String>,
    pub locale: Option<String>,
    /// Replaces the whole preamble (keyword-extraction sub-requests)
    pub instruction_override: Option<String>,
    /// Search-augmented text for the outgoing user message; wire-only
    pub effective_user_content: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Assemble the system preamble in its fixed order.
/// Empty result means no system message at all.
fn assemble_preamble(conversation: &Conversation, params: &TurnParams) -> Option<String> {
    if let Some(instruction) = non_blank(&params.instruction_override) {
        return Some(instruction.to_string());
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(date) = non_blank(&params.current_date) {
        parts.push(format!("Current date: {}", date));
    }
    if let Some(workspace) = non_blank(&params.workspace_instructions) {
        parts.push(workspace.to_string());
    }
    let expert = non_blank(&params.expert_instructions);
    if let Some(expert) = expert {
        parts.push(expert.to_string());
    } else if let Some(tone) = non_blank(&params.tone) {
        // Expert instructions take precedence over tone
        parts.push(tone.to_string());
    }
    if let Some(prompt) = non_blank(&conversation.system_prompt) {
        parts.push(prompt.to_string());
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Project one user message onto the wire: mention expansion plus image
/// parts, explicitly attached images first, then mention-resolved ones.
fn project_user_message(message: &Message, text: &str, index: &AttachmentIndex) -> WireMessage {
    let resolution = mention_resolver::resolve(text, index);

    let mut images = message.images.clone();
    for resolved in resolution.resolved_images {
        if !images.iter().any(|img| img.name == resolved.name) {
            images.push(resolved);
        }
    }

    if images.is_empty() {
        return WireMessage::text(Role::User, resolution.expanded_text);
    }

    let mut parts = vec![WirePart::Text {
        text: resolution.expanded_text,
    }];
    parts.extend(images.into_iter().map(|image| WirePart::ImageUrl {
        image_url: ImageUrl { url: image.content },
    }));

    WireMessage {
        role: "user",
        content: WireContent::Parts(parts),
    }
}

/// Build the wire request for one turn.
///
/// Pure function of its inputs: the conversation (for preamble fields), the
/// history slice to send, the turn parameters and the attachment index.
pub fn build_request(
    conversation: &Conversation,
    history: &[Message],
    params: &TurnParams,
    index: &AttachmentIndex,
) -> CompletionRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);

    if let Some(preamble) = assemble_preamble(conversation, params) {
        messages.push(WireMessage::system(preamble));
    }

    let last_user_index = history.iter().rposition(|m| m.role == Role::User);

    for (position, message) in history.iter().enumerate() {
        match message.role {
            Role::User => {
                // The outgoing user message may carry search-effective text
                let text = if Some(position) == last_user_index {
                    params
                        .effective_user_content
                        .as_deref()
                        .unwrap_or(&message.content)
                } else {
                    &message.content
                };
                messages.push(project_user_message(message, text, index));
            }
            Role::Assistant => {
                // Inline error notices are client-side only
                if message.is_error {
                    continue;
                }
                messages.push(WireMessage::text(Role::Assistant, message.content.clone()));
            }
        }
    }

    // Out-of-range temperatures are dropped rather than clamped
    let temperature = params.temperature.filter(|t| (0.0..=2.0).contains(t));

    CompletionRequest {
        model: params.model.clone(),
        messages,
        temperature,
        request_type: params.request_type,
        session_token: params.session_token.clone(),
        locale: params.locale.clone(),
        stream: params.stream,
    }
}
