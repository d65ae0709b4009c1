//! # tierfill-types
//!
//! Core type definitions for tierfill.
//!
//! This crate is the foundation of the dependency graph -- the LLM and core
//! crates both depend on it. It contains:
//!
//! - **[`tier`]** -- [`TierName`], the ordered difficulty buckets
//! - **[`config`]** -- Tier, field, fallback, rate-limit and checkpoint policies
//! - **[`record`]** -- [`InputRecord`], the unit of enrichment
//! - **[`progress`]** -- Progress events emitted during a run
//! - **[`error`]** -- [`ConfigError`]

pub mod config;
pub mod error;
pub mod progress;
pub mod record;
pub mod tier;

pub use config::{
    BackoffStrategy, CheckpointPolicy, EnrichmentConfig, FallbackPolicy, FieldConfig,
    RateLimitPolicy, TierConfig, TierSet,
};
pub use error::ConfigError;
pub use progress::{ProgressEvent, ProgressVerbosity, TierStatus};
pub use record::InputRecord;
pub use tier::TierName;
