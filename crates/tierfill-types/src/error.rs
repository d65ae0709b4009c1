//! Configuration error type.

use thiserror::Error;

use crate::tier::TierName;

/// A configuration value is malformed or semantically invalid.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A tier name did not match `simple`, `medium` or `complex`.
    #[error("unknown tier: {0}")]
    UnknownTier(String),

    /// A tier was configured with a batch size of zero.
    #[error("tier {tier} has batch size 0")]
    ZeroBatchSize {
        /// The offending tier.
        tier: TierName,
    },

    /// A tier has no model identifier.
    #[error("tier {tier} has no model")]
    MissingModel {
        /// The offending tier.
        tier: TierName,
    },

    /// The degrade chain repeats a tier or does not run expensive to cheap.
    #[error("invalid degrade chain: {reason}")]
    InvalidDegradeChain {
        /// What is wrong with the chain.
        reason: String,
    },

    /// A field assignment is unusable.
    #[error("invalid field {path}: {reason}")]
    InvalidField {
        /// Dotted output path of the field.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration document could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
