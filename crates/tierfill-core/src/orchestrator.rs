//! The tiered batch scheduler.
//!
//! [`EnrichmentOrchestrator::enrich_batch`] walks the tiers cheapest first,
//! splits the records still to do into fixed-size batches, asks the
//! provider once per batch and prompt, and folds the routed answers into
//! the cumulative result and the checkpoint.
//!
//! Everything runs on one task. Tiers, batches and prompts are visited in
//! a fixed order, so two runs over the same input issue the same calls.
//!
//! When a call keeps failing, the same tier is retried
//! `fallback.retries_per_tier` times, sleeping between attempts per the
//! rate-limit backoff policy, then the prompt is handed unchanged to the
//! next tier of the degrade chain with that tier's model and system prompt.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tierfill_llm::rate_limiter::compute_backoff;
use tierfill_llm::{CompletionOptions, CompletionProvider, ProviderError};
use tierfill_types::{
    ConfigError, EnrichmentConfig, FieldConfig, InputRecord, ProgressEvent, ProgressVerbosity,
    TierName, TierStatus,
};

use crate::checkpoint::{CheckpointStore, CheckpointValidation, FieldValues};
use crate::cost::{CostEstimate, estimate_cost};
use crate::prompts::{PromptRegistry, build_batch_prompt};
use crate::reply::{index_reply, nest_fields, route_answer};

/// Receives progress events.
pub type ProgressCallback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Source name recorded in the checkpoint when none is given.
pub const DEFAULT_SOURCE_NAME: &str = "records";

// ── Options and results ──────────────────────────────────────────────────

/// Per-run options for [`EnrichmentOrchestrator::enrich_batch`].
#[derive(Default)]
pub struct EnrichOptions {
    /// Pick up from an existing checkpoint in `output_directory`.
    pub resume: bool,
    /// Process only this tier.
    pub tier_filter: Option<TierName>,
    /// Progress observer.
    pub on_progress: Option<ProgressCallback>,
    /// How many events the observer receives.
    pub verbosity: ProgressVerbosity,
    /// Where the checkpoint lives. Without one, nothing is persisted.
    pub output_directory: Option<PathBuf>,
    /// Input name recorded in the checkpoint.
    pub source_name: Option<String>,
}

impl EnrichOptions {
    /// Builder: checkpoint into `dir`.
    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(dir.into());
        self
    }

    /// Builder: resume from the checkpoint if it is still valid.
    pub fn resuming(mut self) -> Self {
        self.resume = true;
        self
    }

    /// Builder: restrict the run to one tier.
    pub fn only_tier(mut self, tier: TierName) -> Self {
        self.tier_filter = Some(tier);
        self
    }

    /// Builder: observe progress.
    pub fn with_progress<F>(mut self, verbosity: ProgressVerbosity, callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.verbosity = verbosity;
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Builder: name the input in the checkpoint.
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }
}

impl std::fmt::Debug for EnrichOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichOptions")
            .field("resume", &self.resume)
            .field("tier_filter", &self.tier_filter)
            .field("on_progress", &self.on_progress.is_some())
            .field("verbosity", &self.verbosity)
            .field("output_directory", &self.output_directory)
            .field("source_name", &self.source_name)
            .finish()
    }
}

/// How a run related to an existing checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeStatus {
    /// No checkpoint was consulted or none existed.
    Fresh,
    /// A valid checkpoint was used; `skipped` records needed no work.
    Resumed {
        /// Records taken from the checkpoint.
        skipped: usize,
    },
    /// A checkpoint existed but could not be used.
    Discarded {
        /// Why it was rejected.
        reason: String,
    },
}

/// Why a record failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    /// Record id.
    pub id: String,
    /// Tier being processed.
    pub tier: TierName,
    /// Prompt that failed.
    pub prompt: String,
    /// Human-readable cause.
    pub reason: String,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Record id -> output path -> value.
    pub results: BTreeMap<String, BTreeMap<String, Value>>,
    /// Records with at least one failure, in first-failure order.
    pub failed_ids: Vec<String>,
    /// Provider calls made, including retries and degraded calls.
    pub api_calls: u32,
    /// Tokens reported by the provider.
    pub tokens_used: u64,
    /// Wall-clock time of the run.
    pub duration: Duration,
    /// One entry per failed record and prompt.
    pub errors: Vec<RecordError>,
    /// Relation to an existing checkpoint.
    pub resume: ResumeStatus,
    /// `false` when the provider was unavailable and nothing ran.
    pub enabled: bool,
}

impl BatchResult {
    fn empty(enabled: bool) -> Self {
        Self {
            results: BTreeMap::new(),
            failed_ids: Vec::new(),
            api_calls: 0,
            tokens_used: 0,
            duration: Duration::ZERO,
            errors: Vec::new(),
            resume: ResumeStatus::Fresh,
            enabled,
        }
    }

    /// The fields of one record as a nested JSON object.
    pub fn nested(&self, id: &str) -> Option<Value> {
        self.results.get(id).map(nest_fields)
    }
}

// ── Progress ─────────────────────────────────────────────────────────────

struct ProgressTracker {
    callback: Option<ProgressCallback>,
    verbosity: ProgressVerbosity,
    started: Instant,
    total_work: usize,
    done_work: usize,
}

impl ProgressTracker {
    fn percent(&self) -> f64 {
        if self.total_work == 0 {
            100.0
        } else {
            self.done_work as f64 / self.total_work as f64 * 100.0
        }
    }

    fn emit(
        &self,
        tier: TierName,
        status: TierStatus,
        current: usize,
        total: usize,
        api_calls: u32,
        errors: usize,
    ) {
        let Some(callback) = &self.callback else {
            return;
        };
        if status == TierStatus::BatchCompleted && self.verbosity == ProgressVerbosity::Tiers {
            return;
        }
        let elapsed = self.started.elapsed();
        let remaining = (self.done_work > 0 && self.total_work >= self.done_work).then(|| {
            elapsed.mul_f64((self.total_work - self.done_work) as f64 / self.done_work as f64)
        });
        callback(&ProgressEvent {
            current,
            total,
            tier,
            status,
            percent: self.percent(),
            elapsed,
            remaining,
            api_calls,
            errors,
        });
    }
}

// ── Run state ────────────────────────────────────────────────────────────

#[derive(Default)]
struct RunTally {
    api_calls: u32,
    tokens_used: u64,
    errors: Vec<RecordError>,
    failed_ids: Vec<String>,
    failed_set: HashSet<String>,
}

impl RunTally {
    /// Returns true the first time `id` fails in this run.
    fn mark_failed(&mut self, id: &str) -> bool {
        if self.failed_set.insert(id.to_string()) {
            self.failed_ids.push(id.to_string());
            true
        } else {
            false
        }
    }

    fn has_failed(&self, id: &str) -> bool {
        self.failed_set.contains(id)
    }
}

// ── EnrichmentOrchestrator ───────────────────────────────────────────────

/// Schedules enrichment of records across tiers.
pub struct EnrichmentOrchestrator {
    provider: Arc<dyn CompletionProvider>,
    config: EnrichmentConfig,
    prompts: PromptRegistry,
}

impl EnrichmentOrchestrator {
    /// Build an orchestrator.
    ///
    /// Fails when the configuration is invalid or a field names a prompt
    /// the registry does not know.
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        config: EnrichmentConfig,
        prompts: PromptRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        for (path, field) in &config.fields {
            if !prompts.contains(&field.prompt) {
                return Err(ConfigError::InvalidField {
                    path: path.clone(),
                    reason: format!("unknown prompt id \"{}\"", field.prompt),
                });
            }
        }
        Ok(Self {
            provider,
            config,
            prompts,
        })
    }

    /// Whether the provider can make calls.
    pub fn is_enabled(&self) -> bool {
        self.provider.is_available()
    }

    /// The run configuration.
    pub fn config(&self) -> &EnrichmentConfig {
        &self.config
    }

    /// Estimate cost for `record_count` records under this configuration.
    pub fn estimate_cost(&self, record_count: usize) -> CostEstimate {
        estimate_cost(&self.config, record_count)
    }

    /// Enrich `records`.
    ///
    /// Never fails as a whole: problems with individual records land in
    /// `failed_ids` and `errors`, and checkpoint I/O problems are logged.
    pub async fn enrich_batch(&self, records: &[InputRecord], options: EnrichOptions) -> BatchResult {
        let started = Instant::now();

        if !self.is_enabled() {
            warn!(
                provider = %self.provider.name(),
                "completion provider unavailable, enrichment disabled"
            );
            return BatchResult::empty(false);
        }

        let tiers: Vec<TierName> = TierName::ALL
            .into_iter()
            .filter(|t| options.tier_filter.is_none_or(|only| only == *t))
            .collect();
        let active: Vec<TierName> = tiers
            .iter()
            .copied()
            .filter(|t| self.config.fields_for_tier(*t).next().is_some())
            .collect();

        let mut store = match (&options.output_directory, self.config.checkpoint.enabled) {
            (Some(dir), true) => Some(CheckpointStore::new(dir, self.config.checkpoint.clone())),
            _ => None,
        };

        let mut results: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        let mut resume = ResumeStatus::Fresh;
        let mut remaining: Vec<&InputRecord> = records.iter().collect();
        let mut resumed = false;

        if let Some(store) = store.as_mut() {
            if options.resume && store.load().is_some() {
                match store.validate(&self.config) {
                    CheckpointValidation::Valid => {
                        for record in records {
                            if let Some(stored) = store.results_for(&record.id) {
                                let entry = results.entry(record.id.clone()).or_default();
                                for fields in stored.values() {
                                    entry.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                                }
                            }
                        }
                        let ledger: &CheckpointStore = store;
                        remaining.retain(|r| !Self::is_covered(ledger, &r.id, &active));
                        let skipped = records.len() - remaining.len();
                        info!(
                            skipped,
                            remaining = remaining.len(),
                            "resuming from checkpoint"
                        );
                        resume = ResumeStatus::Resumed { skipped };
                        resumed = true;
                    }
                    CheckpointValidation::Invalid { reason } => {
                        warn!(%reason, "discarding checkpoint");
                        resume = ResumeStatus::Discarded { reason };
                    }
                }
            }
            if !resumed {
                let source = options.source_name.as_deref().unwrap_or(DEFAULT_SOURCE_NAME);
                if let Err(e) = store.initialize(source, records.len(), &self.config) {
                    warn!(error = %e, "could not initialize checkpoint");
                }
            }
        }

        if resumed && remaining.is_empty() {
            info!(records = records.len(), "checkpoint covers every record, nothing to do");
            return BatchResult {
                results,
                duration: started.elapsed(),
                resume,
                ..BatchResult::empty(true)
            };
        }

        let mut tally = RunTally::default();
        let mut progress = ProgressTracker {
            callback: options.on_progress,
            verbosity: options.verbosity,
            started,
            total_work: remaining.len() * active.len(),
            done_work: 0,
        };

        info!(
            records = records.len(),
            remaining = remaining.len(),
            tiers = ?active,
            "starting enrichment"
        );

        for tier in tiers {
            let fields: Vec<(&str, &FieldConfig)> = self
                .config
                .fields_for_tier(tier)
                .map(|(path, field)| (path.as_str(), field))
                .collect();
            if fields.is_empty() {
                debug!(%tier, "tier has no fields, skipping");
                progress.emit(
                    tier,
                    TierStatus::Skipped,
                    0,
                    0,
                    tally.api_calls,
                    tally.failed_ids.len(),
                );
                continue;
            }

            let total = remaining.len();
            progress.emit(tier, TierStatus::Started, 0, total, tally.api_calls, tally.failed_ids.len());

            let batch_size = self.config.tiers.get(tier).batch_size.max(1);
            let mut current = 0;
            for (batch_index, batch) in remaining.chunks(batch_size).enumerate() {
                debug!(%tier, batch = batch_index, size = batch.len(), "processing batch");
                self.process_batch(tier, &fields, batch, &mut results, &mut tally, store.as_mut())
                    .await;

                current += batch.len();
                progress.done_work += batch.len();
                progress.emit(
                    tier,
                    TierStatus::BatchCompleted,
                    current,
                    total,
                    tally.api_calls,
                    tally.failed_ids.len(),
                );
            }

            progress.emit(
                tier,
                TierStatus::Completed,
                current,
                total,
                tally.api_calls,
                tally.failed_ids.len(),
            );
        }

        if let Some(store) = store.as_mut() {
            let outcome = if tally.failed_ids.is_empty() {
                store.clear()
            } else {
                store.force_save().map(|_| ())
            };
            if let Err(e) = outcome {
                warn!(error = %e, "could not finalize checkpoint");
            }
        }

        let duration = started.elapsed();
        info!(
            api_calls = tally.api_calls,
            tokens = tally.tokens_used,
            failed = tally.failed_ids.len(),
            duration_ms = duration.as_millis() as u64,
            "enrichment finished"
        );

        BatchResult {
            results,
            failed_ids: tally.failed_ids,
            api_calls: tally.api_calls,
            tokens_used: tally.tokens_used,
            duration,
            errors: tally.errors,
            resume,
            enabled: true,
        }
    }

    /// Completed in the checkpoint and has stored results for every tier
    /// this run would visit.
    fn is_covered(store: &CheckpointStore, id: &str, active: &[TierName]) -> bool {
        if !store.is_completed(id) {
            return false;
        }
        let Some(stored) = store.results_for(id) else {
            return active.is_empty();
        };
        active.iter().all(|tier| stored.contains_key(tier))
    }

    async fn process_batch(
        &self,
        tier: TierName,
        fields: &[(&str, &FieldConfig)],
        batch: &[&InputRecord],
        results: &mut BTreeMap<String, BTreeMap<String, Value>>,
        tally: &mut RunTally,
        mut store: Option<&mut CheckpointStore>,
    ) {
        let mut produced: BTreeMap<&str, FieldValues> = BTreeMap::new();
        let mut batch_failed: BTreeSet<String> = BTreeSet::new();
        let mut defaults: BTreeMap<String, FieldValues> = BTreeMap::new();

        for prompt_id in self.config.prompts_for_tier(tier) {
            let Some(template) = self.prompts.get(prompt_id) else {
                continue;
            };
            let prompt_fields: Vec<(&str, &FieldConfig)> = fields
                .iter()
                .copied()
                .filter(|(_, f)| f.prompt == prompt_id)
                .collect();
            let prompt = build_batch_prompt(template, &prompt_fields, batch);

            let mut fail = |id: &str, reason: String, tally: &mut RunTally| {
                warn!(%tier, prompt = prompt_id, id, %reason, "record failed");
                tally.errors.push(RecordError {
                    id: id.to_string(),
                    tier,
                    prompt: prompt_id.to_string(),
                    reason,
                });
                batch_failed.insert(id.to_string());
                if self.config.fallback.use_defaults {
                    let filled = defaults.entry(id.to_string()).or_default();
                    for (path, field) in &prompt_fields {
                        if let Some(default) = &field.default {
                            filled.insert((*path).to_string(), default.clone());
                        }
                    }
                }
            };

            match self.call_with_fallback(tier, &prompt, tally).await {
                Ok(reply) => match index_reply(reply) {
                    Ok(indexed) => {
                        for record in batch {
                            let Some(answer) = indexed.get(&record.id) else {
                                fail(&record.id, "record missing from reply".into(), tally);
                                continue;
                            };
                            match route_answer(template, &prompt_fields, answer) {
                                Ok(values) => {
                                    produced.entry(record.id.as_str()).or_default().extend(values);
                                }
                                Err(reason) => fail(&record.id, reason, tally),
                            }
                        }
                    }
                    Err(reason) => {
                        for record in batch {
                            fail(&record.id, format!("unusable reply: {reason}"), tally);
                        }
                    }
                },
                Err(err) => {
                    for record in batch {
                        fail(&record.id, err.to_string(), tally);
                    }
                }
            }
        }

        for record in batch {
            let id = record.id.as_str();
            let values = produced.remove(id).unwrap_or_default();
            let entry = results.entry(id.to_string()).or_default();
            entry.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            if let Some(filled) = defaults.remove(id) {
                for (path, value) in filled {
                    entry.entry(path).or_insert(value);
                }
            }

            if batch_failed.contains(id) {
                tally.mark_failed(id);
            }
            let success = !tally.has_failed(id);
            if let Some(store) = store.as_deref_mut()
                && let Err(e) = store.update(id, success, tier, Some(values))
            {
                warn!(id, error = %e, "could not update checkpoint");
            }
        }
    }

    /// Most attempts one logical call starting at `start` can make.
    fn attempt_budget(&self, start: TierName) -> usize {
        let fallback = &self.config.fallback;
        (fallback.retries_per_tier as usize + 1) * fallback.chain_len_from(start)
    }

    /// One logical call: retries at the same tier with backoff, then walks
    /// the degrade chain. Every attempt counts as an API call.
    async fn call_with_fallback(
        &self,
        start: TierName,
        prompt: &str,
        tally: &mut RunTally,
    ) -> Result<Value, ProviderError> {
        let fallback = &self.config.fallback;
        let rate = &self.config.rate_limit;
        let budget = self.attempt_budget(start);
        let mut tier = start;
        let mut attempt: u32 = 0;
        loop {
            let tier_config = self.config.tiers.get(tier);
            let options = CompletionOptions {
                model: Some(tier_config.model.clone()),
                system_prompt: Some(tier_config.effective_system_prompt(tier).to_string()),
                temperature: Some(tier_config.temperature),
                max_output_tokens: Some(tier_config.max_output_tokens),
            };

            tally.api_calls += 1;
            let err = match self.provider.complete_json_with_usage(prompt, &options).await {
                Ok(reply) => {
                    tally.tokens_used += reply.tokens_used;
                    return Ok(reply.value);
                }
                Err(err) => err,
            };

            if attempt < fallback.retries_per_tier {
                attempt += 1;
                let delay = compute_backoff(
                    rate.backoff_strategy,
                    rate.initial_backoff(),
                    rate.max_backoff(),
                    attempt,
                );
                debug!(
                    %tier,
                    attempt,
                    budget,
                    delay_ms = delay.as_millis() as u64,
                    throttled = err.is_rate_limited(),
                    error = %err,
                    "retrying at same tier"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let next = fallback
                .allow_degrade
                .then(|| fallback.next_tier(tier))
                .flatten();
            match next {
                Some(next) => {
                    warn!(from = %tier, to = %next, error = %err, "degrading to cheaper tier");
                    tier = next;
                    attempt = 0;
                }
                None => {
                    debug!(%start, budget, "fallback chain exhausted");
                    return Err(err);
                }
            }
        }
    }
}

impl std::fmt::Debug for EnrichmentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentOrchestrator")
            .field("provider", &self.provider.name())
            .field("fields", &self.config.fields.len())
            .finish()
    }
}
