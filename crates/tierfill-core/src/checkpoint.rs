//! Durable progress ledger for resumable runs.
//!
//! One JSON document per output directory records which records are done,
//! which failed, and every field produced so far, keyed by a fingerprint of
//! the configuration that produced them. A later run with the same
//! fingerprint can skip completed records; a run with a different one
//! starts over.
//!
//! Writes go to a uniquely named temp file in the same directory, which is
//! then renamed over the checkpoint, so a crash mid-write leaves the
//! previous checkpoint intact. Nothing guards against two processes using
//! the same directory at once.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use tierfill_types::{CheckpointPolicy, EnrichmentConfig, TierName};

use crate::canonical::fingerprint;
use crate::error::CheckpointError;

/// File name of the checkpoint inside the output directory.
pub const CHECKPOINT_FILE_NAME: &str = ".tierfill-checkpoint.json";

/// Current on-disk format version.
pub const CHECKPOINT_VERSION: &str = "1.0";

/// Field path -> value, for one record and one tier.
pub type FieldValues = BTreeMap<String, Value>;

/// Tier -> fields, for one record.
pub type TierResults = BTreeMap<TierName, FieldValues>;

static EMPTY_IDS: BTreeSet<String> = BTreeSet::new();
static EMPTY_RESULTS: BTreeMap<String, TierResults> = BTreeMap::new();

// ── CheckpointState ──────────────────────────────────────────────────────

/// The persisted ledger.
///
/// `completed_ids` and `failed_ids` are disjoint, and
/// `completed_exercises == completed_ids.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointState {
    /// Format version; anything but [`CHECKPOINT_VERSION`] invalidates.
    pub version: String,
    /// Fingerprint of the configuration the results were produced under.
    pub config_hash: String,
    /// When the run that created this checkpoint started.
    pub started_at: DateTime<Utc>,
    /// Time of the last update.
    pub last_updated_at: DateTime<Utc>,
    /// Name of the input the records came from.
    pub input_file: String,
    /// Number of records in the run.
    pub total_exercises: usize,
    /// Number of completed records.
    pub completed_exercises: usize,
    /// Records whose every prompt has succeeded so far.
    pub completed_ids: BTreeSet<String>,
    /// Records with at least one failed prompt.
    pub failed_ids: BTreeSet<String>,
    /// Tier of the most recent update.
    pub current_tier: Option<TierName>,
    /// Record id -> tier -> field path -> value.
    pub results: BTreeMap<String, TierResults>,
}

impl CheckpointState {
    fn fresh(source_name: &str, total: usize, config_hash: String) -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_VERSION.to_string(),
            config_hash,
            started_at: now,
            last_updated_at: now,
            input_file: source_name.to_string(),
            total_exercises: total,
            completed_exercises: 0,
            completed_ids: BTreeSet::new(),
            failed_ids: BTreeSet::new(),
            current_tier: None,
            results: BTreeMap::new(),
        }
    }
}

/// Outcome of [`CheckpointStore::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointValidation {
    /// Safe to resume from.
    Valid,
    /// Must be discarded.
    Invalid {
        /// Human-readable cause.
        reason: String,
    },
}

impl CheckpointValidation {
    /// Whether the checkpoint may be resumed.
    pub fn is_valid(&self) -> bool {
        matches!(self, CheckpointValidation::Valid)
    }
}

/// Whether a save actually wrote the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No pending changes, or persistence is disabled.
    NothingToDo,
    /// The file was rewritten.
    Saved,
}

/// Fingerprint of the parts of `config` that shape model requests.
pub fn config_fingerprint(config: &EnrichmentConfig) -> Result<String, CheckpointError> {
    Ok(fingerprint(&config.fingerprint_view())?)
}

// ── CheckpointStore ──────────────────────────────────────────────────────

/// Owns the checkpoint file of one output directory.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    path: PathBuf,
    policy: CheckpointPolicy,
    state: Option<CheckpointState>,
    /// Updates since the last write.
    dirty: u32,
}

impl CheckpointStore {
    /// A store for `dir`. Nothing is read or written until asked.
    pub fn new(dir: impl Into<PathBuf>, policy: CheckpointPolicy) -> Self {
        let dir = dir.into();
        let path = dir.join(CHECKPOINT_FILE_NAME);
        Self {
            dir,
            path,
            policy,
            state: None,
            dirty: 0,
        }
    }

    /// Location of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory state, if initialized or loaded.
    pub fn state(&self) -> Option<&CheckpointState> {
        self.state.as_ref()
    }

    /// Start a fresh ledger and persist it immediately.
    pub fn initialize(
        &mut self,
        source_name: &str,
        total: usize,
        config: &EnrichmentConfig,
    ) -> Result<(), CheckpointError> {
        let hash = config_fingerprint(config)?;
        debug!(path = %self.path.display(), config_hash = %hash, total, "initializing checkpoint");
        self.state = Some(CheckpointState::fresh(source_name, total, hash));
        self.dirty = 0;
        self.force_save()?;
        Ok(())
    }

    /// Read the checkpoint from disk.
    ///
    /// A missing, unreadable or malformed file is reported as `None`, not
    /// as an error; the in-memory state is left untouched in that case.
    pub fn load(&mut self) -> Option<&CheckpointState> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no readable checkpoint");
                return None;
            }
        };
        match serde_json::from_str::<CheckpointState>(&text) {
            Ok(state) => {
                self.state = Some(state);
                self.dirty = 0;
                self.state.as_ref()
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "checkpoint is malformed, ignoring");
                None
            }
        }
    }

    /// Decide whether the loaded state may be resumed under `config`.
    pub fn validate(&self, config: &EnrichmentConfig) -> CheckpointValidation {
        let Some(state) = &self.state else {
            return CheckpointValidation::Invalid {
                reason: "no checkpoint loaded".into(),
            };
        };
        if state.version != CHECKPOINT_VERSION {
            return CheckpointValidation::Invalid {
                reason: format!(
                    "checkpoint version {} is not supported (expected {CHECKPOINT_VERSION})",
                    state.version
                ),
            };
        }
        match config_fingerprint(config) {
            Ok(hash) if hash == state.config_hash => CheckpointValidation::Valid,
            Ok(hash) => CheckpointValidation::Invalid {
                reason: format!(
                    "configuration changed since checkpoint (checkpoint {}, current {hash})",
                    state.config_hash
                ),
            },
            Err(e) => CheckpointValidation::Invalid {
                reason: format!("could not fingerprint configuration: {e}"),
            },
        }
    }

    /// Record the outcome of one record at one tier.
    ///
    /// Moving an id between the completed and failed sets is idempotent.
    /// `partial` is merged into the record's results for `tier` field by
    /// field, so earlier fields of the same tier are kept; an empty
    /// `partial` still marks the tier as visited. Persists once
    /// the configured number of updates has accumulated.
    pub fn update(
        &mut self,
        id: &str,
        success: bool,
        tier: TierName,
        partial: Option<FieldValues>,
    ) -> Result<SaveOutcome, CheckpointError> {
        let state = self.state.as_mut().ok_or(CheckpointError::NotInitialized)?;

        if success {
            state.failed_ids.remove(id);
            state.completed_ids.insert(id.to_string());
        } else {
            state.completed_ids.remove(id);
            state.failed_ids.insert(id.to_string());
        }
        state.completed_exercises = state.completed_ids.len();

        if let Some(fields) = partial {
            state
                .results
                .entry(id.to_string())
                .or_default()
                .entry(tier)
                .or_default()
                .extend(fields);
        }

        state.current_tier = Some(tier);
        state.last_updated_at = Utc::now();

        self.dirty = self.dirty.saturating_add(1);
        if self.dirty >= self.policy.save_interval.max(1) {
            return self.save();
        }
        Ok(SaveOutcome::NothingToDo)
    }

    /// Persist if there are pending updates.
    pub fn save(&mut self) -> Result<SaveOutcome, CheckpointError> {
        if self.dirty == 0 {
            return Ok(SaveOutcome::NothingToDo);
        }
        self.force_save()
    }

    /// Persist unconditionally (temp file, then rename).
    pub fn force_save(&mut self) -> Result<SaveOutcome, CheckpointError> {
        if !self.policy.enabled {
            self.dirty = 0;
            return Ok(SaveOutcome::NothingToDo);
        }
        let state = self.state.as_ref().ok_or(CheckpointError::NotInitialized)?;
        let json = serde_json::to_string_pretty(state)?;

        std::fs::create_dir_all(&self.dir).map_err(|e| CheckpointError::io(&self.dir, e))?;

        let tmp_path = self
            .dir
            .join(format!("{CHECKPOINT_FILE_NAME}.{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = std::fs::write(&tmp_path, &json) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CheckpointError::io(&tmp_path, e));
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CheckpointError::io(&self.path, e));
        }

        self.dirty = 0;
        debug!(
            path = %self.path.display(),
            completed = state.completed_exercises,
            failed = state.failed_ids.len(),
            "checkpoint saved"
        );
        Ok(SaveOutcome::Saved)
    }

    /// Delete the file and forget the in-memory state.
    pub fn clear(&mut self) -> Result<(), CheckpointError> {
        self.state = None;
        self.dirty = 0;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "checkpoint cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(&self.path, e)),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    /// Completed record ids (empty when uninitialized).
    pub fn completed_ids(&self) -> &BTreeSet<String> {
        self.state
            .as_ref()
            .map(|s| &s.completed_ids)
            .unwrap_or(&EMPTY_IDS)
    }

    /// Failed record ids (empty when uninitialized).
    pub fn failed_ids(&self) -> &BTreeSet<String> {
        self.state
            .as_ref()
            .map(|s| &s.failed_ids)
            .unwrap_or(&EMPTY_IDS)
    }

    /// Whether `id` is in the completed set.
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed_ids().contains(id)
    }

    /// Stored results for one record.
    pub fn results_for(&self, id: &str) -> Option<&TierResults> {
        self.state.as_ref().and_then(|s| s.results.get(id))
    }

    /// All stored results.
    pub fn all_results(&self) -> &BTreeMap<String, TierResults> {
        self.state
            .as_ref()
            .map(|s| &s.results)
            .unwrap_or(&EMPTY_RESULTS)
    }

    /// Completed share of the run, 0.0 to 100.0.
    pub fn progress_percent(&self) -> f64 {
        match &self.state {
            Some(s) if s.total_exercises > 0 => {
                s.completed_exercises as f64 / s.total_exercises as f64 * 100.0
            }
            _ => 0.0,
        }
    }

    /// Tier of the most recent update.
    pub fn current_tier(&self) -> Option<TierName> {
        self.state.as_ref().and_then(|s| s.current_tier)
    }

    /// Updates not yet written to disk.
    pub fn pending_updates(&self) -> u32 {
        self.dirty
    }
}
