//! JSON extraction from model replies.
//!
//! Models asked for JSON often wrap it in a markdown fence, sometimes with a
//! sentence of prose around it. [`parse_json_reply`] takes the contents of
//! the first fenced block when there is one and parses that; otherwise it
//! parses the whole reply.

use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::types::CompletionOptions;

/// Appended to the system prompt for JSON calls.
pub const JSON_ONLY_INSTRUCTION: &str =
    "Respond with valid JSON only. Do not include explanations or markdown.";

/// Characters of the raw reply kept in a [`ProviderError::ReplyParse`].
pub const EXCERPT_CHARS: usize = 200;

/// Options for a JSON call: the caller's system prompt followed by
/// [`JSON_ONLY_INSTRUCTION`].
pub fn with_json_instruction(options: &CompletionOptions) -> CompletionOptions {
    let system_prompt = match options.system_prompt.as_deref() {
        Some(existing) if !existing.trim().is_empty() => {
            format!("{}\n\n{JSON_ONLY_INSTRUCTION}", existing.trim_end())
        }
        _ => JSON_ONLY_INSTRUCTION.to_string(),
    };
    CompletionOptions {
        system_prompt: Some(system_prompt),
        ..options.clone()
    }
}

/// Parse a model reply as JSON.
pub fn parse_json_reply(text: &str) -> Result<Value> {
    let body = strip_code_fence(text);
    serde_json::from_str(body).map_err(|e| ProviderError::ReplyParse {
        message: e.to_string(),
        excerpt: excerpt(text),
    })
}

/// Contents of the first fenced code block, or the trimmed input when there
/// is no complete fence.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_ticks = &trimmed[open + 3..];
    // Skip the info string ("json", "JSON", ...) up to the first newline.
    let body_start = match after_ticks.find('\n') {
        Some(nl) => nl + 1,
        None => return trimmed,
    };
    let body = &after_ticks[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    out.push_str("...");
    out
}
