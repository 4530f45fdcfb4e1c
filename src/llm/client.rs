//! LLM client for structured data extraction.
//!
//! Supports OpenAI-compatible chat-completions APIs and Ollama for local
//! inference. Every request observes the shared rate-limit floor; requests
//! that fail rate-limit-shaped (HTTP 429 or a "rate_limit" error body) retry
//! with jittered exponential backoff, anything else fails immediately.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::rate_limit::RateLimiter;

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI-compatible API (OpenAI, Groq, Together.ai, etc.)
    #[default]
    OpenAI,
    /// Ollama API (local inference)
    Ollama,
}

/// Configuration for the LLM client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    /// API endpoint (provider-specific defaults apply)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key for OpenAI-compatible providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model used for extraction
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens in the response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum characters of document content sent per request
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// Minimum seconds between outbound requests (rate-limit floor)
    #[serde(default = "default_min_request_interval")]
    pub min_request_interval_secs: f64,
    /// Maximum retries on rate-limit errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff, in seconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: f64,
    /// Per-request timeout, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_content_chars() -> usize {
    15_000
}

fn default_min_request_interval() -> f64 {
    3.0
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay() -> f64 {
    2.0
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_content_chars: default_max_content_chars(),
            min_request_interval_secs: default_min_request_interval(),
            max_retries: default_max_retries(),
            retry_base_delay_secs: default_retry_base_delay(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Chat-completions request format (OpenAI-compatible).
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// LLM client for document processing. Clones share the rate-limit floor.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration.
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs_f64(
            config.min_request_interval_secs,
        )));

        Self {
            config,
            client,
            limiter,
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Override the model (CLI `--model` flag).
    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model {
            self.config.model = model;
        }
        self
    }

    /// Truncate content to the configured bound with an explicit marker.
    pub fn truncate_content<'a>(&self, content: &'a str) -> std::borrow::Cow<'a, str> {
        let max = self.config.max_content_chars;
        if content.len() <= max {
            return std::borrow::Cow::Borrowed(content);
        }
        warn!(
            "⚠️ Content too long ({} chars), truncating to {}",
            content.len(),
            max
        );
        let mut cut = max;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        std::borrow::Cow::Owned(format!("{}... [content truncated]", &content[..cut]))
    }

    /// Single completion with retry-on-rate-limit, returning the raw text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        self.request_with_retry(system, user, false).await
    }

    /// Structured extraction: JSON response mode where supported, fences
    /// stripped, parsed as JSON. A response that fails to parse yields
    /// `{"raw_text": <response>}` instead of an error.
    pub async fn extract_structured(
        &self,
        prompt: &str,
        content: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let truncated = self.truncate_content(content);
        let system = "You are an AI assistant skilled in structured data extraction. \
                      Extract only ACTUAL information from the document, not fictional data.";
        let user = format!("{prompt}\n\n{truncated}");

        let raw = self.request_with_retry(system, &user, true).await?;
        info!("✅ LLM response received: {} chars", raw.len());
        Ok(parse_structured(&raw))
    }

    async fn request_with_retry(
        &self,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> Result<String, LlmError> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;

            let result = match self.config.provider {
                LlmProvider::OpenAI => self.call_openai(system, user, json_mode).await,
                LlmProvider::Ollama => self.call_ollama(system, user).await,
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if is_rate_limit_error(&e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(LlmError::RateLimited(self.config.max_retries));
                    }
                    let delay = RateLimiter::backoff_delay(
                        attempt,
                        Duration::from_secs_f64(self.config.retry_base_delay_secs),
                        Duration::from_secs(60),
                    );
                    warn!(
                        "⚠️ Rate limit hit. Retry {}/{} - waiting {:.2}s",
                        attempt,
                        self.config.max_retries,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_openai(
        &self,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.config.endpoint);
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        debug!("Calling {} with model {}", url, self.config.model);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::Api("429 rate_limit".to_string()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Api(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| LlmError::Parse("empty completion response".to_string()))
    }

    async fn call_ollama(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.config.endpoint);
        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: user.to_string(),
            system: system.to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::Api("429 rate_limit".to_string()));
        }
        if !status.is_success() {
            return Err(LlmError::Api(format!("HTTP {status}")));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(parsed.response.trim().to_string())
    }
}

/// A rate-limit-shaped error: HTTP 429 or "rate_limit" in the error text.
fn is_rate_limit_error(error: &LlmError) -> bool {
    match error {
        LlmError::Api(message) => {
            message.contains("429") || message.to_lowercase().contains("rate_limit")
        }
        _ => false,
    }
}

/// Strip markdown code fences and parse the response as JSON. Responses
/// that still fail to parse come back as `{"raw_text": <response>}`.
pub fn parse_structured(raw: &str) -> serde_json::Value {
    let cleaned = strip_fences(raw);
    match serde_json::from_str::<serde_json::Value>(cleaned) {
        Ok(value) => value,
        Err(e) => {
            warn!("⚠ LLM response is not valid JSON: {e}");
            serde_json::json!({ "raw_text": raw })
        }
    }
}

/// Remove ```json ... ``` or ``` ... ``` wrappers from a response.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.split_once("```json").map(|(_, rest)| rest) {
        if let Some((inner, _)) = rest.split_once("```") {
            return inner.trim();
        }
        return rest.trim();
    }
    if let Some(rest) = trimmed.split_once("```").map(|(_, rest)| rest) {
        if let Some((inner, _)) = rest.split_once("```") {
            return inner.trim();
        }
        return rest.trim();
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn valid_json_parses() {
        let value = parse_structured("```json\n{\"plan\": \"west\"}\n```");
        assert_eq!(value["plan"], "west");
    }

    #[test]
    fn malformed_json_falls_back_to_raw_text() {
        let raw = "```json\n{foo:\n```";
        let value = parse_structured(raw);
        assert_eq!(value["raw_text"], raw);
    }

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limit_error(&LlmError::Api("429 too many".into())));
        assert!(is_rate_limit_error(&LlmError::Api(
            "error: rate_limit_exceeded".into()
        )));
        assert!(!is_rate_limit_error(&LlmError::Api("HTTP 500".into())));
        assert!(!is_rate_limit_error(&LlmError::Connection("timeout".into())));
    }

    #[test]
    fn truncation_adds_marker() {
        let mut config = LlmConfig::default();
        config.max_content_chars = 10;
        let client = LlmClient::new(config);
        let truncated = client.truncate_content("abcdefghijklmnop");
        assert!(truncated.ends_with("... [content truncated]"));
        assert!(truncated.starts_with("abcdefghij"));
    }

    #[test]
    fn short_content_is_untouched() {
        let client = LlmClient::new(LlmConfig::default());
        assert_eq!(client.truncate_content("short"), "short");
    }
}
