//! Provider error types for tierfill-llm.
//!
//! All provider operations return [`Result<T>`] which uses [`ProviderError`]
//! as the error type.

use thiserror::Error;

/// Errors that can occur when asking a completion endpoint for text.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The endpoint is throttling requests (HTTP 429).
    #[error("rate limited{}", retry_suffix(.retry_after_ms))]
    RateLimited {
        /// Server-suggested wait before retrying, in milliseconds.
        retry_after_ms: Option<u64>,
    },

    /// The endpoint answered with a non-success status other than 429.
    #[error("api error (HTTP {status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The provider has not been configured (e.g. missing API key).
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The response envelope could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The generated text was expected to be JSON but was not.
    #[error("could not parse model reply as JSON: {message} (reply began: {excerpt:?})")]
    ReplyParse {
        /// Parser message.
        message: String,
        /// The first characters of the raw reply.
        excerpt: String,
    },

    /// An HTTP-level error from reqwest (connect, timeout, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Whether this is a throttling signal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    /// HTTP status code, for errors that carry one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::RateLimited { .. } => Some(429),
            ProviderError::Api { status, .. } => Some(*status),
            ProviderError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn retry_suffix(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(": retry after {ms}ms"),
        None => String::new(),
    }
}

/// A convenience type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
