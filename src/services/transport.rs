use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::models::overlay::ControlErrorCode;
use crate::services::backoff::retry_with_backoff;
use crate::services::request_builder::CompletionRequest;
use crate::services::web_search::{SearchBackend, SearchQuery, SearchResponse};
use crate::settings::{ModelEndpoint, RetryPolicy};

/// Request timeout for non-streaming calls
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Typed failures at the transport boundary
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Recognized control-error code from a non-2xx body; handled as an
    /// overlay, never as conversation content
    #[error("control code: {}", .0.as_code())]
    Control(ControlErrorCode),

    /// Any other non-2xx response
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Only plain network failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Raw body chunks of a streaming response
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Classify a non-2xx response body against the closed code taxonomy.
/// Unknown codes and non-JSON bodies fall through to a generic status error.
pub fn classify_error_body(status: u16, body: &str) -> TransportError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error").and_then(|e| e.get("message")))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        });

    if let Some(code) = message.as_deref().and_then(ControlErrorCode::from_code) {
        return TransportError::Control(code);
    }

    TransportError::Status {
        status,
        body: body.to_string(),
    }
}

/// Seam to the inference endpoint
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Single non-streaming completion; returns the assistant text
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError>;

    /// Streaming completion; returns the raw chunked body
    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, TransportError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// reqwest-backed client for a configured model endpoint
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: ModelEndpoint,
    retry: RetryPolicy,
}

impl HttpCompletionClient {
    pub fn new(endpoint: ModelEndpoint, retry: RetryPolicy) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            retry,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.base_url)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.endpoint.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    async fn post_once(&self, request: &CompletionRequest) -> Result<reqwest::Response, TransportError> {
        let response = self
            .apply_auth(self.client.post(self.completions_url()).json(request))
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error_body(status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionTransport for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError> {
        // Sub-requests may race backend-side provisioning; retry bounded
        let response = retry_with_backoff(
            &self.retry,
            "completion",
            || self.post_once(request),
            TransportError::is_retryable,
        )
        .await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| TransportError::InvalidResponse("empty choices".to_string()))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, TransportError> {
        debug!(model = %request.model, "Opening completion stream");
        // The main completion call is never retried
        let response = self.post_once(request).await?;

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| TransportError::Network(err.to_string()))
        });
        Ok(stream.boxed())
    }
}

/// reqwest-backed search backend client
pub struct HttpSearchClient {
    client: reqwest::Client,
    search_url: String,
    retry: RetryPolicy,
}

impl HttpSearchClient {
    pub fn new(search_url: String, retry: RetryPolicy) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(Self {
            client,
            search_url,
            retry,
        })
    }
}

#[async_trait]
impl SearchBackend for HttpSearchClient {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, TransportError> {
        let response = retry_with_backoff(
            &self.retry,
            "search",
            || async {
                let response = self
                    .client
                    .post(&self.search_url)
                    .json(query)
                    .send()
                    .await
                    .map_err(|err| TransportError::Network(err.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(TransportError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Ok(response)
            },
            TransportError::is_retryable,
        )
        .await?;

        response
            .json()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_recognized_code() {
        let body = r#"{"message":"show_daily_free_limit_reached"}"#;
        match classify_error_body(403, body) {
            TransportError::Control(code) => {
                assert_eq!(code, ControlErrorCode::DailyFreeLimitReached)
            }
            other => panic!("expected control error, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_nested_error_shape() {
        let body = r#"{"error":{"message":"wrong_key"}}"#;
        assert!(matches!(
            classify_error_body(401, body),
            TransportError::Control(ControlErrorCode::WrongKey)
        ));
    }

    #[test]
    fn test_classify_unknown_code_falls_through() {
        let body = r#"{"message":"totally_new_code"}"#;
        match classify_error_body(429, body) {
            TransportError::Status { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("totally_new_code"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_non_json_body() {
        assert!(matches!(
            classify_error_body(502, "<html>bad gateway</html>"),
            TransportError::Status { status: 502, .. }
        ));
    }

    #[test]
    fn test_only_network_errors_retry() {
        assert!(TransportError::Network("reset".to_string()).is_retryable());
        assert!(!TransportError::Control(ControlErrorCode::WrongKey).is_retryable());
        assert!(
            !TransportError::Status {
                status: 500,
                body: String::new()
            }
            .is_retryable()
        );
    }
}
