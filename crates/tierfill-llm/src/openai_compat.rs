//! OpenAI-compatible HTTP transport.
//!
//! [`OpenAiCompatTransport`] talks to any endpoint that accepts the OpenAI
//! chat completion format: OpenAI itself, Anthropic's compat endpoint,
//! OpenRouter, Groq, local gateways and so on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::LlmProviderConfig;
use crate::error::{ProviderError, Result};
use crate::transport::CompletionTransport;
use crate::types::{ChatRequest, ChatResponse};

/// A transport for the OpenAI-compatible chat completion API.
///
/// # Construction
///
/// ```rust,ignore
/// use tierfill_llm::{LlmProviderConfig, OpenAiCompatTransport};
///
/// let config = LlmProviderConfig::new("openai", "https://api.openai.com/v1", "OPENAI_API_KEY")
///     .with_default_model("gpt-4o-mini");
/// let transport = OpenAiCompatTransport::new(config);
/// ```
pub struct OpenAiCompatTransport {
    config: LlmProviderConfig,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAiCompatTransport {
    /// Create a transport whose API key is read from `config.api_key_env`
    /// at request time.
    pub fn new(config: LlmProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            api_key: None,
        }
    }

    /// Create a transport with an explicit API key.
    pub fn with_api_key(config: LlmProviderConfig, api_key: impl Into<String>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            api_key: Some(api_key.into()),
        }
    }

    /// Returns the endpoint configuration.
    pub fn config(&self) -> &LlmProviderConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Explicit key first, then the environment variable.
    fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        match std::env::var(&self.config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ProviderError::NotConfigured(format!(
                "set {} env var",
                self.config.api_key_env
            ))),
        }
    }
}

#[async_trait]
impl CompletionTransport for OpenAiCompatTransport {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_configured(&self) -> bool {
        self.resolve_api_key().is_ok()
    }

    fn default_model(&self) -> Option<&str> {
        self.config.default_model.as_deref()
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_key = self.resolve_api_key()?;
        let url = self.completions_url();

        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let mut req = self
            .http
            .post(&url)
            .timeout(self.config.timeout())
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json");

        for (k, v) in &self.config.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.json(request).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let header_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            let body = response.text().await.unwrap_or_default();
            let retry_after_ms = header_ms.or_else(|| parse_retry_after_body(&body));
            warn!(
                provider = %self.config.name,
                retry_after_ms = ?retry_after_ms,
                "rate limited"
            );
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                provider = %self.config.name,
                status = status.as_u16(),
                "completion request failed"
            );
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("failed to parse response: {e}"))
        })?;

        debug!(
            provider = %self.config.name,
            model = %chat_response.model,
            choices = chat_response.choices.len(),
            tokens = chat_response.total_tokens(),
            "chat completion response received"
        );

        Ok(chat_response)
    }
}

/// Convert a `Retry-After` header value to milliseconds.
///
/// Accepts delta-seconds (integer or fractional) or an HTTP-date, which is
/// converted to the time remaining from `now`. Dates in the past yield 0.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        if !secs.is_finite() {
            return None;
        }
        return Some((secs * 1000.0).max(0.0) as u64);
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let remaining = at.with_timezone(&Utc) - now;
    Some(remaining.num_milliseconds().max(0) as u64)
}

/// Some endpoints put the hint in the JSON error body instead.
fn parse_retry_after_body(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").unwrap_or(&value);
    error
        .get("retry_after_ms")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            error
                .get("retry_after")
                .and_then(|v| v.as_f64())
                .map(|secs| (secs * 1000.0).max(0.0) as u64)
        })
}

impl std::fmt::Debug for OpenAiCompatTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatTransport")
            .field("name", &self.config.name)
            .field("base_url", &self.config.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}
