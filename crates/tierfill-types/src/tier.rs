//! Difficulty tiers.
//!
//! A [`TierName`] groups fields by how hard they are for a model to fill in.
//! Tiers are totally ordered: `simple < medium < complex`. Processing always
//! runs in ascending order, and degrading after repeated failures always
//! moves towards `simple`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One of the three difficulty buckets.
///
/// Serializes as a lowercase string (`"simple"`, `"medium"`, `"complex"`),
/// which is also the form used as a map key in checkpoint files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
    /// Cheap, fast model; large batches.
    Simple,
    /// Mid-range model.
    Medium,
    /// Expensive, accurate model; small batches.
    Complex,
}

impl TierName {
    /// All tiers in processing order.
    pub const ALL: [TierName; 3] = [TierName::Simple, TierName::Medium, TierName::Complex];

    /// The lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            TierName::Simple => "simple",
            TierName::Medium => "medium",
            TierName::Complex => "complex",
        }
    }

    /// Position in processing order (0 = simple).
    pub fn ordinal(self) -> usize {
        match self {
            TierName::Simple => 0,
            TierName::Medium => 1,
            TierName::Complex => 2,
        }
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(TierName::Simple),
            "medium" => Ok(TierName::Medium),
            "complex" => Ok(TierName::Complex),
            other => Err(ConfigError::UnknownTier(other.to_owned())),
        }
    }
}
