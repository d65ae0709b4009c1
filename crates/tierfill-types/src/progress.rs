//! Progress events emitted by the orchestrator.
//!
//! Events are the only coupling between a run and whatever front end
//! displays it. They are plain data and serialize to JSON so they can be
//! forwarded over any channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tier::TierName;

/// Where a tier is in its lifecycle when an event is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    /// The tier is about to process its first batch.
    Started,
    /// A batch of the tier has finished.
    BatchCompleted,
    /// Every batch of the tier has finished.
    Completed,
    /// The tier has no configured fields and was not run.
    Skipped,
}

/// How many events a run emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressVerbosity {
    /// Only tier boundaries (started / completed / skipped).
    Tiers,
    /// Tier boundaries plus one event per batch.
    #[default]
    Batches,
}

/// A snapshot of run progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Records processed so far in the current tier.
    pub current: usize,
    /// Records the current tier has to process.
    pub total: usize,
    /// The tier the event is about.
    pub tier: TierName,
    /// Lifecycle position of `tier`.
    pub status: TierStatus,
    /// Overall completion across all active tiers, 0.0 to 100.0.
    pub percent: f64,
    /// Time since the run started.
    pub elapsed: Duration,
    /// Linear extrapolation of the time still needed, once any work is done.
    pub remaining: Option<Duration>,
    /// Provider calls made so far in this run.
    pub api_calls: u32,
    /// Failed records so far in this run.
    pub errors: usize,
}
