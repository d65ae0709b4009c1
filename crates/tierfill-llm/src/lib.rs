//! Completion provider abstraction for tierfill.
//!
//! This crate turns "send a prompt, get text back" into a swappable
//! contract and ships one implementation for OpenAI-compatible HTTP
//! endpoints, gated by a sliding-window rate limiter.
//!
//! # Architecture
//!
//! - [`CompletionProvider`] is the contract the orchestrator calls
//! - [`RemoteCompletionProvider`] adds rate gating and retry over any
//!   [`CompletionTransport`]
//! - [`OpenAiCompatTransport`] performs a single HTTP attempt
//! - [`RateLimiter`] enforces the per-minute ceiling and backoff window
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tierfill_llm::{
//!     CompletionOptions, CompletionProvider, RateLimiter, RemoteCompletionProvider,
//!     config::builtin_provider,
//! };
//! use tierfill_types::RateLimitPolicy;
//!
//! let limiter = Arc::new(RateLimiter::new(&RateLimitPolicy::default()));
//! let provider = RemoteCompletionProvider::from_config(builtin_provider("openai").unwrap())
//!     .with_rate_gate(limiter);
//!
//! let reply = provider
//!     .complete_json("Classify: push-up", &CompletionOptions::default().with_model("gpt-4o-mini"))
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod json;
pub mod openai_compat;
pub mod provider;
pub mod rate_limiter;
pub mod retry;
pub mod transport;
pub mod types;

pub use config::LlmProviderConfig;
pub use error::{ProviderError, Result};
pub use json::{parse_json_reply, with_json_instruction};
pub use openai_compat::OpenAiCompatTransport;
pub use provider::{CompletionProvider, OpenAiCompatProvider, RemoteCompletionProvider};
pub use rate_limiter::{RateGate, RateLimiter, RateLimiterState};
pub use retry::RetryConfig;
pub use transport::CompletionTransport;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, Completion, CompletionOptions, JsonCompletion, Usage,
};
