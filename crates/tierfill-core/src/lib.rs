//! Tiered, resumable enrichment engine for tierfill.
//!
//! Given records and an [`EnrichmentConfig`](tierfill_types::EnrichmentConfig),
//! the [`EnrichmentOrchestrator`] fills in missing fields by asking a
//! [`CompletionProvider`](tierfill_llm::CompletionProvider), grouping fields
//! by tier so cheap models answer easy questions and expensive models the
//! hard ones.
//!
//! # Modules
//!
//! - [`orchestrator`]: tier/batch scheduling, fallback, progress
//! - [`checkpoint`]: the durable resume ledger
//! - [`canonical`]: canonical JSON and configuration fingerprints
//! - [`prompts`]: prompt templates and reply-field routing
//! - [`reply`]: reply indexing, enum normalization, nesting
//! - [`cost`]: up-front cost estimates

pub mod canonical;
pub mod checkpoint;
pub mod cost;
pub mod error;
pub mod orchestrator;
pub mod prompts;
pub mod reply;

pub use checkpoint::{CheckpointState, CheckpointStore, CheckpointValidation, SaveOutcome};
pub use cost::{CostEstimate, TierCostEstimate, estimate_cost};
pub use error::CheckpointError;
pub use orchestrator::{
    BatchResult, EnrichOptions, EnrichmentOrchestrator, ProgressCallback, RecordError, ResumeStatus,
};
pub use prompts::{PromptRegistry, PromptTemplate};
pub use reply::nest_fields;
