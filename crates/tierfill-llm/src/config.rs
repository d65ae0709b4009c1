//! Endpoint configuration and built-in endpoint definitions.
//!
//! Each [`LlmProviderConfig`] describes how to reach an OpenAI-compatible
//! completion endpoint: base URL, the environment variable holding the API
//! key, a default model and any extra headers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default request timeout when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for a single completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmProviderConfig {
    /// Human-readable name (e.g. "openai").
    pub name: String,

    /// Base URL of the API (e.g. "https://api.openai.com/v1").
    #[serde(alias = "baseUrl")]
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(alias = "apiKeyEnv")]
    pub api_key_env: String,

    /// Model used when a call does not name one.
    #[serde(default, alias = "defaultModel")]
    pub default_model: Option<String>,

    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request timeout in seconds. Defaults to [`DEFAULT_TIMEOUT_SECS`].
    #[serde(default, alias = "timeoutSecs")]
    pub timeout_secs: Option<u64>,
}

impl LlmProviderConfig {
    /// A config with no extra headers and the default timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key_env: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            default_model: None,
            headers: HashMap::new(),
            timeout_secs: None,
        }
    }

    /// Builder: set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Effective request timeout.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

/// Built-in endpoint configurations.
pub fn builtin_providers() -> Vec<LlmProviderConfig> {
    vec![
        LlmProviderConfig::new("openai", "https://api.openai.com/v1", "OPENAI_API_KEY")
            .with_default_model("gpt-4o-mini"),
        LlmProviderConfig {
            headers: HashMap::from([("anthropic-version".into(), "2023-06-01".into())]),
            ..LlmProviderConfig::new(
                "anthropic",
                "https://api.anthropic.com/v1",
                "ANTHROPIC_API_KEY",
            )
            .with_default_model("claude-3-5-haiku-latest")
        },
        LlmProviderConfig::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            "OPENROUTER_API_KEY",
        )
        .with_default_model("openai/gpt-4o-mini"),
        LlmProviderConfig::new("groq", "https://api.groq.com/openai/v1", "GROQ_API_KEY")
            .with_default_model("llama-3.1-8b-instant"),
    ]
}

/// Look up a built-in endpoint by name.
pub fn builtin_provider(name: &str) -> Option<LlmProviderConfig> {
    builtin_providers().into_iter().find(|p| p.name == name)
}
