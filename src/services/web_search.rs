use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::conversation::{Conversation, Message, SearchResults};
use crate::services::mention_resolver::{self, AttachmentIndex};
use crate::services::request_builder::{self, TurnParams};
use crate::services::transport::{CompletionTransport, TransportError};
use crate::settings::SearchSettings;

/// Reduced instruction for the keyword-extraction sub-request
pub const KEYWORD_INSTRUCTION: &str = "Reduce the conversation so far to a single \
    search-engine keyword phrase capturing what the user wants to know. \
    Reply with the phrase only, no quotes, no explanation.";

/// Request to the search backend
#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Payload returned by the search backend
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub serp: Vec<crate::models::conversation::SerpEntry>,
}

impl SearchResponse {
    pub fn into_results(self) -> SearchResults {
        SearchResults {
            content: self.content,
            serp: self.serp,
        }
    }
}

/// Seam to the search backend
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, TransportError>;
}

/// Effective wire content for a search-augmented turn.
/// The stored message text stays untouched; this string is wire-only.
pub fn augmented_content(original: &str, summary: &str, date: &str) -> String {
    format!(
        "{}\n\n---> Search Results (Up-To-Date as of {}):\n{}",
        original, date, summary
    )
}

/// Successful outcome of the search pre-step
#[derive(Debug, Clone)]
pub struct SearchAugmentation {
    /// Raw structured results, attached to the persisted user message
    pub results: SearchResults,
    /// Wire-only content for this turn's outgoing user message
    pub effective_content: String,
}

/// Run the two-call search sub-protocol ahead of the main completion.
///
/// Returns `None` whenever the sub-protocol aborts: empty keyword phrase,
/// failing search call, or unsuccessful payload. Falling through to the
/// direct turn is the designed recovery, so nothing is surfaced.
pub async fn run_search_subprotocol(
    transport: &dyn CompletionTransport,
    backend: &dyn SearchBackend,
    conversation: &Conversation,
    history: &[Message],
    base_params: &TurnParams,
    index: &AttachmentIndex,
    settings: &SearchSettings,
) -> Option<SearchAugmentation> {
    let outgoing_text = history
        .iter()
        .rev()
        .find(|m| m.role == crate::models::conversation::Role::User)
        .map(|m| m.content.clone())?;

    // Mentions take precedence over search; callers check this too, but the
    // sub-protocol never runs against mention-bearing text
    if mention_resolver::has_resolvable_mentions(&outgoing_text, index) {
        return None;
    }

    // Step A: keyword extraction over the full history
    let keyword_params = TurnParams {
        stream: false,
        instruction_override: Some(KEYWORD_INSTRUCTION.to_string()),
        effective_user_content: None,
        ..base_params.clone()
    };
    let keyword_request = request_builder::build_request(conversation, history, &keyword_params, index);
    let phrase = match transport.complete(&keyword_request).await {
        Ok(phrase) => phrase.trim().to_string(),
        Err(err) => {
            warn!(error = %err, "Keyword extraction failed; falling back to direct turn");
            return None;
        }
    };
    if phrase.is_empty() {
        debug!("Keyword extraction returned nothing; falling back to direct turn");
        return None;
    }

    // Step B: search call
    let query = SearchQuery {
        query: phrase.clone(),
        country: settings.country.clone(),
        lang: settings.lang.clone(),
    };
    let response = match backend.search(&query).await {
        Ok(response) if response.success => response,
        Ok(_) => {
            debug!(query = %phrase, "Search backend reported failure; direct turn");
            return None;
        }
        Err(err) => {
            warn!(error = %err, query = %phrase, "Search call failed; direct turn");
            return None;
        }
    };

    // Step C: augment the outgoing content, keep raw results for display
    let date = Utc::now().format("%Y-%m-%d").to_string();
    let effective_content = augmented_content(&outgoing_text, &response.content, &date);
    Some(SearchAugmentation {
        results: response.clone().into_results(),
        effective_content,
    })
}
