//! The [`CompletionProvider`] contract and its remote implementation.
//!
//! The orchestrator only ever sees `dyn CompletionProvider`. The reference
//! implementation, [`RemoteCompletionProvider`], layers rate gating and
//! bounded retry over a single-attempt [`CompletionTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::LlmProviderConfig;
use crate::error::{ProviderError, Result};
use crate::json::{parse_json_reply, with_json_instruction};
use crate::openai_compat::OpenAiCompatTransport;
use crate::rate_limiter::RateGate;
use crate::retry::{RetryConfig, compute_delay, is_retryable, throttle_delay};
use crate::transport::CompletionTransport;
use crate::types::{ChatRequest, Completion, CompletionOptions, JsonCompletion};

/// Something that turns a prompt into text.
///
/// # Example
///
/// ```rust,ignore
/// use tierfill_llm::{CompletionOptions, CompletionProvider};
///
/// async fn ask(provider: &dyn CompletionProvider) -> tierfill_llm::Result<String> {
///     let options = CompletionOptions::default().with_model("gpt-4o-mini");
///     let completion = provider.complete("Name one compound lift.", &options).await?;
///     Ok(completion.text)
/// }
/// ```
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Whether the provider can make calls at all (e.g. credentials exist).
    fn is_available(&self) -> bool {
        true
    }

    /// Send one prompt and return the generated text.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] once the provider's own retry budget is
    /// exhausted, or immediately when it is not configured.
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion>;

    /// Send one prompt with a JSON-only instruction and parse the reply.
    ///
    /// Derived from [`complete_json_with_usage`](Self::complete_json_with_usage);
    /// providers with a native JSON mode override that method instead.
    async fn complete_json(&self, prompt: &str, options: &CompletionOptions) -> Result<Value> {
        Ok(self.complete_json_with_usage(prompt, options).await?.value)
    }

    /// Like [`complete_json`](Self::complete_json), keeping token usage and
    /// the answering model.
    async fn complete_json_with_usage(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<JsonCompletion> {
        let completion = self.complete(prompt, &with_json_instruction(options)).await?;
        Ok(JsonCompletion {
            value: parse_json_reply(&completion.text)?,
            tokens_used: completion.tokens_used,
            model: completion.model,
        })
    }
}

#[async_trait]
impl<P: CompletionProvider + ?Sized> CompletionProvider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        (**self).complete(prompt, options).await
    }

    async fn complete_json(&self, prompt: &str, options: &CompletionOptions) -> Result<Value> {
        (**self).complete_json(prompt, options).await
    }

    async fn complete_json_with_usage(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<JsonCompletion> {
        (**self).complete_json_with_usage(prompt, options).await
    }
}

// ── RemoteCompletionProvider ─────────────────────────────────────────────

/// A [`CompletionProvider`] backed by a remote endpoint.
///
/// Each attempt first waits on the rate gate (if any), then sends through
/// the transport. Throttling signals are reported to the gate and retried
/// after the server's hint, the gate's backoff, or exponential backoff, in
/// that order of preference. Other failures are retried with exponential
/// backoff. The last error is returned once attempts run out.
pub struct RemoteCompletionProvider<T> {
    transport: T,
    gate: Option<Arc<dyn RateGate>>,
    retry: RetryConfig,
    default_model: Option<String>,
}

/// The provider most callers want: OpenAI-compatible HTTP underneath.
pub type OpenAiCompatProvider = RemoteCompletionProvider<OpenAiCompatTransport>;

impl<T: CompletionTransport> RemoteCompletionProvider<T> {
    /// Wrap a transport with the default retry config and no rate gate.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            gate: None,
            retry: RetryConfig::default(),
            default_model: None,
        }
    }

    /// Builder: consult `gate` before every attempt.
    pub fn with_rate_gate(mut self, gate: Arc<dyn RateGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Builder: replace the retry config.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Builder: model used when a call does not name one. Takes precedence
    /// over the transport's default.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the retry config.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    fn resolve_model(&self, options: &CompletionOptions) -> Option<String> {
        options
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .or_else(|| self.transport.default_model().map(str::to_owned))
    }
}

impl RemoteCompletionProvider<OpenAiCompatTransport> {
    /// Provider for an OpenAI-compatible endpoint, key from the environment.
    pub fn from_config(config: LlmProviderConfig) -> Self {
        Self::new(OpenAiCompatTransport::new(config))
    }
}

#[async_trait]
impl<T: CompletionTransport> CompletionProvider for RemoteCompletionProvider<T> {
    fn name(&self) -> &str {
        self.transport.name()
    }

    fn is_available(&self) -> bool {
        self.transport.is_configured()
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        if !self.transport.is_configured() {
            return Err(ProviderError::NotConfigured(format!(
                "{} has no credentials",
                self.transport.name()
            )));
        }
        let model = self.resolve_model(options).ok_or_else(|| {
            ProviderError::NotConfigured(format!("{}: no model specified", self.transport.name()))
        })?;
        let request = ChatRequest::from_prompt(model, prompt, options);

        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            if let Some(gate) = &self.gate {
                gate.acquire().await;
            }

            let err = match self.transport.send(&request).await {
                Ok(response) => {
                    if let Some(gate) = &self.gate {
                        gate.record_success();
                    }
                    match response.first_text() {
                        Some(text) => {
                            if attempt > 0 {
                                debug!(
                                    provider = %self.transport.name(),
                                    attempt,
                                    "request succeeded after retry"
                                );
                            }
                            let model = if response.model.is_empty() {
                                request.model.clone()
                            } else {
                                response.model.clone()
                            };
                            return Ok(Completion {
                                text: text.to_owned(),
                                tokens_used: response.total_tokens(),
                                model,
                            });
                        }
                        None => {
                            ProviderError::InvalidResponse("response contained no choices".into())
                        }
                    }
                }
                Err(err) => err,
            };

            let delay = if let ProviderError::RateLimited { retry_after_ms } = &err {
                let limiter_backoff = match &self.gate {
                    Some(gate) => {
                        gate.record_rate_limit_hit();
                        gate.backoff_remaining()
                    }
                    None => std::time::Duration::ZERO,
                };
                throttle_delay(&self.retry, attempt, *retry_after_ms, limiter_backoff)
            } else {
                compute_delay(&self.retry, attempt)
            };

            attempt += 1;
            if !is_retryable(&err) || attempt >= attempts {
                return Err(err);
            }

            warn!(
                provider = %self.transport.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after failed attempt"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl<T: CompletionTransport> std::fmt::Debug for RemoteCompletionProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCompletionProvider")
            .field("transport", &self.transport.name())
            .field("rate_gated", &self.gate.is_some())
            .field("retry", &self.retry)
            .field("default_model", &self.default_model)
            .finish()
    }
}
