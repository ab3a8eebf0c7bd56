use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Web-search capability of a model endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSearchSupport {
    /// No web search at all
    #[default]
    None,
    /// Client-side "safe" search: keyword extraction plus a search backend
    /// call before the real completion request
    Safe,
    /// Endpoint-native search, toggled per request via `request_type`
    Native,
}

/// A configured model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpoint {
    pub id: String,
    /// Model identifier sent on the wire
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Search backend URL, required for `WebSearchSupport::Safe`
    #[serde(default)]
    pub search_url: Option<String>,
    #[serde(default)]
    pub web_search: WebSearchSupport,
}

impl ModelEndpoint {
    pub fn new(id: &str, model: &str, base_url: &str) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            search_url: None,
            web_search: WebSearchSupport::None,
        }
    }
}

/// Locale hints sent to the search backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

/// Bounded-retry policy for sub-requests that may race backend-side
/// provisioning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

/// Client-wide settings injected into the turn controller.
/// Persisted by the host; defaults are usable as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Prepend a current-date line to the system preamble
    #[serde(default)]
    pub inject_current_date: bool,
    /// Tone instructions; overridden entirely by expert instructions
    #[serde(default)]
    pub tone: Option<String>,
    /// Client locale passed through to the endpoint when enabled
    #[serde(default)]
    pub locale: Option<String>,
    /// Whether the opaque session token is forwarded at all
    #[serde(default)]
    pub send_session_token: bool,
    #[serde(default)]
    pub session_token: Option<String>,
    /// The user-facing web search toggle
    #[serde(default)]
    pub web_search_enabled: bool,
    #[serde(default)]
    pub search: SearchSettings,
    /// Workspace id -> workspace-level instructions
    #[serde(default)]
    pub workspaces: HashMap<String, String>,
    /// Expert id -> expert-level instructions
    #[serde(default)]
    pub experts: HashMap<String, String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ClientSettings {
    pub fn workspace_instructions(&self, workspace_id: Option<&str>) -> Option<String> {
        workspace_id
            .and_then(|id| self.workspaces.get(id))
            .filter(|s| !s.trim().is_empty())
            .cloned()
    }

    pub fn expert_instructions(&self, expert_id: Option<&str>) -> Option<String> {
        expert_id
            .and_then(|id| self.experts.get(id))
            .filter(|s| !s.trim().is_empty())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip_with_defaults() {
        let json = "{}";
        let settings: ClientSettings = serde_json::from_str(json).unwrap();
        assert!(!settings.inject_current_date);
        assert!(!settings.web_search_enabled);
        assert_eq!(settings.retry.attempts, 3);
    }

    #[test]
    fn test_instruction_lookup_filters_blank() {
        let mut settings = ClientSettings::default();
        settings.workspaces.insert("w1".to_string(), "  ".to_string());
        settings.experts.insert("e1".to_string(), "Be formal".to_string());

        assert_eq!(settings.workspace_instructions(Some("w1")), None);
        assert_eq!(settings.workspace_instructions(Some("missing")), None);
        assert_eq!(
            settings.expert_instructions(Some("e1")).as_deref(),
            Some("Be formal")
        );
        assert_eq!(settings.expert_instructions(None), None);
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let endpoint = ModelEndpoint::new("main", "gpt-test", "https://api.example.com/v1/");
        assert_eq!(endpoint.base_url, "https://api.example.com/v1");
    }
}
