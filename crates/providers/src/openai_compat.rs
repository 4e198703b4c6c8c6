//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI and any
//! endpoint exposing `/v1/chat/completions`.

use crate::shape::adapt_turns;
use async_trait::async_trait;
use careline_core::error::ProviderError;
use careline_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// An OpenAI-compatible chat-completions provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
    supports_system_role: bool,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: "gpt-4o-mini".into(),
            supports_system_role: true,
            client: build_client(Duration::from_secs(30)),
        }
    }

    /// Build from the `[provider]` config section.
    pub fn from_config(config: &careline_config::ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no API key for provider '{}' (set CARELINE_API_KEY)",
                config.name
            ))
        })?;

        Ok(Self::new(&config.name, &config.base_url, api_key)
            .with_model(&config.model)
            .with_system_role(config.supports_system_role)
            .with_timeout(Duration::from_secs(config.timeout_secs)))
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama provider. Many local models reject the system role.
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
        .with_system_role(false)
    }

    /// Model used when a request leaves `model` empty.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_system_role(mut self, supported: bool) -> Self {
        self.supports_system_role = supported;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert turns to OpenAI API format, folding system turns when unsupported.
    fn to_api_messages(&self, turns: &[careline_core::ChatTurn]) -> Vec<ApiMessage> {
        adapt_turns(turns, self.supports_system_role)
            .into_iter()
            .map(|t| ApiMessage {
                role: t.role.as_str().to_string(),
                content: t.content,
            })
            .collect()
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Backoff hint when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Map a non-success HTTP status to a provider error.
fn classify_status(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => {
            ProviderError::AuthenticationFailed("Invalid API key or insufficient permissions".into())
        }
        404 => ProviderError::ModelNotFound(body),
        400 | 422 => ProviderError::BadRequest(body),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

/// Map a transport error: timeouts are reported separately so they count as transient.
fn classify_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl careline_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_system_role(&self) -> bool {
        self.supports_system_role
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let body = serde_json::json!({
            "model": model,
            "messages": self.to_api_messages(&request.turns),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        debug!(provider = %self.name, model = %model, turns = request.turns.len(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status().as_u16();

        if status != 200 {
            let retry_after = retry_after_secs(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(classify_status(status, retry_after, error_body));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        parse_response(api_response, model)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(classify_transport)?;

        Ok(response.status().is_success())
    }
}

fn parse_response(
    api_response: ApiResponse,
    requested_model: String,
) -> Result<GenerationResponse, ProviderError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ApiError {
            status_code: 200,
            message: "No choices in response".into(),
        })?;

    let usage = api_response.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    Ok(GenerationResponse {
        content: choice.message.content.unwrap_or_default(),
        tokens_used: usage.map(|u| u.total_tokens).unwrap_or(0),
        model: api_response.model.unwrap_or(requested_model),
        stop_reason: choice.finish_reason,
        usage,
    })
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use careline_core::{ChatTurn, Provider, Role};

    #[test]
    fn openrouter_constructor() {
        let p = OpenAiCompatProvider::openrouter("test-key");
        assert_eq!(p.name(), "openrouter");
        assert_eq!(p.base_url(), "https://openrouter.ai/api/v1");
        assert!(p.supports_system_role());
    }

    #[test]
    fn ollama_folds_system_turns() {
        let p = OpenAiCompatProvider::ollama(None);
        assert!(!p.supports_system_role());

        let msgs = p.to_api_messages(&[ChatTurn::system("Jawab singkat."), ChatTurn::user("halo")]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, Role::User.as_str());
        assert!(msgs[0].content.starts_with("Jawab singkat."));
        assert!(msgs[0].content.ends_with("halo"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let p = OpenAiCompatProvider::new("x", "http://localhost:8000/v1/", "k");
        assert_eq!(p.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn from_config_requires_key() {
        let config = careline_config::ProviderConfig::default();
        assert!(matches!(
            OpenAiCompatProvider::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        let config = careline_config::ProviderConfig {
            api_key: Some("sk-test".into()),
            supports_system_role: false,
            ..Default::default()
        };
        let p = OpenAiCompatProvider::from_config(&config).unwrap();
        assert!(!p.supports_system_role());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(429, None, String::new()),
            ProviderError::RateLimited { retry_after_secs: DEFAULT_RETRY_AFTER_SECS }
        ));
        assert!(matches!(
            classify_status(429, Some(42), String::new()),
            ProviderError::RateLimited { retry_after_secs: 42 }
        ));
        assert!(matches!(
            classify_status(401, None, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            classify_status(400, None, "max_tokens too large".into()),
            ProviderError::BadRequest(_)
        ));
        let server = classify_status(503, None, "overloaded".into());
        assert!(server.is_transient());
        assert!(!classify_status(400, None, String::new()).is_transient());
    }

    #[test]
    fn retry_after_header_is_read_as_seconds() {
        use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_secs(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 17 "));
        assert_eq!(retry_after_secs(&headers), Some(17));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"));
        assert_eq!(retry_after_secs(&headers), None);
    }

    #[test]
    fn parse_completion_response() {
        let raw = r#"{
            "model": "gpt-4o-mini-2024",
            "choices": [{"message": {"role": "assistant", "content": "Baik, terima kasih."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 40, "completion_tokens": 8, "total_tokens": 48}
        }"#;
        let api: ApiResponse = serde_json::from_str(raw).unwrap();
        let resp = parse_response(api, "gpt-4o-mini".into()).unwrap();
        assert_eq!(resp.content, "Baik, terima kasih.");
        assert_eq!(resp.tokens_used, 48);
        assert_eq!(resp.model, "gpt-4o-mini-2024");
        assert_eq!(resp.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn empty_choices_is_an_error() {
        let api: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parse_response(api, "m".into()).is_err());
    }
}
