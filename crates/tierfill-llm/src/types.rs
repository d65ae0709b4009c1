//! Request and response types for completion calls.
//!
//! The wire types mirror the OpenAI chat completion format, which most
//! hosted endpoints accept. [`CompletionOptions`] and [`Completion`] are the
//! provider-level view the orchestrator works with.

use serde::{Deserialize, Serialize};

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// The role of the message author ("system", "user", "assistant").
    pub role: String,

    /// The content of the message.
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    /// Create a message with role and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// A chat completion request body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    /// The model identifier (e.g. "gpt-4o-mini").
    pub model: String,

    /// The conversation messages.
    pub messages: Vec<ChatMessage>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ChatRequest {
    /// Create a minimal request with a model and messages.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Build a request from a prompt and per-call options.
    ///
    /// The system message, when present, precedes the user prompt.
    pub fn from_prompt(model: impl Into<String>, prompt: &str, options: &CompletionOptions) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = options.system_prompt.as_deref() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));
        Self {
            model: model.into(),
            messages,
            max_tokens: options.max_output_tokens,
            temperature: options.temperature,
        }
    }
}

/// A chat completion response (OpenAI format).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatResponse {
    /// Completion identifier, when the endpoint sends one.
    #[serde(default)]
    pub id: String,

    /// The completion choices.
    pub choices: Vec<Choice>,

    /// Token usage statistics, if available.
    #[serde(default)]
    pub usage: Option<Usage>,

    /// The model that generated the response.
    #[serde(default)]
    pub model: String,
}

impl ChatResponse {
    /// Text of the first choice, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// Total tokens reported by the endpoint, or 0.
    pub fn total_tokens(&self) -> u64 {
        self.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0)
    }
}

/// A single completion choice within a response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Choice {
    /// Index of this choice.
    #[serde(default)]
    pub index: u32,

    /// The assistant message.
    pub message: ChatMessage,

    /// Why generation stopped ("stop", "length", ...).
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage statistics for a completion request.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u64,

    /// Tokens in the generated completion.
    #[serde(default)]
    pub completion_tokens: u64,

    /// Prompt plus completion.
    #[serde(default)]
    pub total_tokens: u64,
}

// ── Provider-level types ────────────────────────────────────────────────

/// Per-call options for [`CompletionProvider::complete`](crate::provider::CompletionProvider::complete).
///
/// Every field is optional; unset fields fall back to the provider's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    /// Model to use for this call.
    pub model: Option<String>,
    /// System instruction sent ahead of the prompt.
    pub system_prompt: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Output token cap.
    pub max_output_tokens: Option<u32>,
}

impl CompletionOptions {
    /// Builder: set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Builder: set the system prompt.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Builder: set the temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Builder: set the output token cap.
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// The text a provider produced for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Tokens billed for the call.
    pub tokens_used: u64,
    /// Model that answered.
    pub model: String,
}

/// A reply parsed as JSON, with the accounting of the call that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonCompletion {
    /// Parsed reply.
    pub value: serde_json::Value,
    /// Tokens billed for the call.
    pub tokens_used: u64,
    /// Model that answered.
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_unset_options() {
        let req = ChatRequest::new("gpt-4o", vec![ChatMessage::user("hi")]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn from_prompt_places_system_first() {
        let options = CompletionOptions::default()
            .with_system_prompt("be terse")
            .with_temperature(0.1)
            .with_max_output_tokens(256);
        let req = ChatRequest::from_prompt("gpt-4o-mini", "classify", &options);
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0], ChatMessage::system("be terse"));
        assert_eq!(req.messages[1], ChatMessage::user("classify"));
        assert_eq!(req.max_tokens, Some(256));
        assert_eq!(req.temperature, Some(0.1));
    }

    #[test]
    fn from_prompt_without_system() {
        let req = ChatRequest::from_prompt("m", "p", &CompletionOptions::default());
        assert_eq!(req.messages, vec![ChatMessage::user("p")]);
    }

    #[test]
    fn response_deserializes_with_missing_optionals() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.first_text(), Some("ok"));
        assert_eq!(resp.total_tokens(), 0);
        assert!(resp.model.is_empty());
    }

    #[test]
    fn response_reports_usage() {
        let json = r#"{
            "id": "cmpl-1",
            "model": "gpt-4o",
            "choices": [{"index":0,"message":{"role":"assistant","content":"{}"},"finish_reason":"stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.total_tokens(), 15);
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
    }
}
