//! The single-attempt HTTP seam under [`RemoteCompletionProvider`](crate::provider::RemoteCompletionProvider).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// Sends one chat request and returns the decoded response.
///
/// Implementations make exactly one attempt: rate gating and retry are the
/// provider's job. Throttling must surface as
/// [`ProviderError::RateLimited`](crate::error::ProviderError::RateLimited)
/// so the provider can notify its limiter.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Whether credentials are present. A transport that reports `false`
    /// is never sent a request.
    fn is_configured(&self) -> bool {
        true
    }

    /// Model used when the request does not name one.
    fn default_model(&self) -> Option<&str> {
        None
    }

    /// Perform a single request.
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
