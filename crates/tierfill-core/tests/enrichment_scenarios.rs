//! End-to-end runs of the orchestrator against a scripted provider.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use tierfill_core::checkpoint::{CHECKPOINT_FILE_NAME, FieldValues};
use tierfill_core::{
    CheckpointStore, EnrichOptions, EnrichmentOrchestrator, PromptRegistry, ResumeStatus,
};
use tierfill_llm::{Completion, CompletionOptions, CompletionProvider, ProviderError};
use tierfill_types::{
    EnrichmentConfig, FieldConfig, InputRecord, ProgressEvent, ProgressVerbosity, TierName,
    TierStatus,
};

// ── Scripted provider ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Call {
    model: String,
    ids: Vec<String>,
}

#[derive(Default)]
struct ScriptedProvider {
    calls: Mutex<Vec<Call>>,
    unavailable: bool,
    /// Calls with this index or later fail.
    fail_from: Option<usize>,
    /// model -> ids left out of the reply.
    omit: HashMap<String, HashSet<String>>,
    tokens_per_call: u64,
}

impl ScriptedProvider {
    fn answering() -> Self {
        Self {
            tokens_per_call: 7,
            ..Self::default()
        }
    }

    fn failing_from(index: usize) -> Self {
        Self {
            fail_from: Some(index),
            ..Self::answering()
        }
    }

    fn omitting(model: &str, id: &str) -> Self {
        let mut omit = HashMap::new();
        omit.insert(model.to_string(), HashSet::from([id.to_string()]));
        Self {
            omit,
            ..Self::answering()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn models(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.model).collect()
    }
}

/// Pull the record ids out of the pretty-printed records block.
fn ids_in(prompt: &str) -> Vec<String> {
    const MARKER: &str = "\"id\": \"";
    let mut ids = Vec::new();
    let mut rest = prompt;
    while let Some(start) = rest.find(MARKER) {
        rest = &rest[start + MARKER.len()..];
        if let Some(end) = rest.find('"') {
            ids.push(rest[..end].to_string());
            rest = &rest[end..];
        }
    }
    ids
}

fn full_answer() -> Value {
    json!({
        "movement": "Push",
        "mechanic": "compound",
        "force": "push",
        "level": "beginner",
        "primary": ["chest"],
        "secondary": ["triceps", "shoulders"],
        "steps": ["Lower yourself", "Press back up"],
        "tips": ["Keep a straight line"],
        "mistakes": ["Sagging hips"]
    })
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> tierfill_llm::Result<Completion> {
        let model = options.model.clone().unwrap_or_default();
        let ids = ids_in(prompt);
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                model: model.clone(),
                ids: ids.clone(),
            });
            calls.len() - 1
        };

        if self.fail_from.is_some_and(|from| index >= from) {
            return Err(ProviderError::Api {
                status: 500,
                body: "upstream down".into(),
            });
        }

        let omitted = self.omit.get(&model);
        let mut reply = serde_json::Map::new();
        for id in ids {
            if omitted.is_some_and(|set| set.contains(&id)) {
                continue;
            }
            reply.insert(id, full_answer());
        }
        Ok(Completion {
            text: format!("```json\n{}\n```", Value::Object(reply)),
            tokens_used: self.tokens_per_call,
            model,
        })
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

fn records(n: usize) -> Vec<InputRecord> {
    (1..=n)
        .map(|i| {
            InputRecord::new(format!("ex-{i}"), format!("exercise-{i}"), format!("Exercise {i}"))
                .with_target("chest")
        })
        .collect()
}

fn simple_config(batch_size: usize) -> EnrichmentConfig {
    let mut config = EnrichmentConfig::default().with_field(
        "classification.movement",
        FieldConfig::new(TierName::Simple, "classification").with_allowed_values(["push", "pull"]),
    );
    config.tiers.get_mut(TierName::Simple).batch_size = batch_size;
    config
}

fn two_tier_config() -> EnrichmentConfig {
    simple_config(20).with_field(
        "muscles.primary",
        FieldConfig::new(TierName::Medium, "muscles"),
    )
}

fn orchestrator(provider: Arc<ScriptedProvider>, config: EnrichmentConfig) -> EnrichmentOrchestrator {
    EnrichmentOrchestrator::new(provider, config, PromptRegistry::with_builtins()).unwrap()
}

fn collector() -> (Arc<Mutex<Vec<ProgressEvent>>>, impl Fn(&ProgressEvent) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    (events, move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone()))
}

// ── Batching ───────────────────────────────────────────────────────────

#[tokio::test]
async fn records_are_split_into_fixed_size_batches() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider.clone(), simple_config(2));

    let result = orch.enrich_batch(&records(3), EnrichOptions::default()).await;

    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].ids, vec!["ex-1", "ex-2"]);
    assert_eq!(calls[1].ids, vec!["ex-3"]);
    assert_eq!(result.api_calls, 2);
    assert!(result.failed_ids.is_empty());
    assert_eq!(result.results.len(), 3);
    assert!(result.enabled);
}

#[tokio::test]
async fn enum_answers_are_normalized() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider, simple_config(5));

    let result = orch.enrich_batch(&records(1), EnrichOptions::default()).await;

    assert_eq!(result.results["ex-1"]["classification.movement"], json!("push"));
}

#[tokio::test]
async fn tokens_are_summed_across_calls() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider, simple_config(2));

    let result = orch.enrich_batch(&records(4), EnrichOptions::default()).await;

    assert_eq!(result.api_calls, 2);
    assert_eq!(result.tokens_used, 14);
}

#[tokio::test]
async fn tiers_without_fields_make_no_calls() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider.clone(), EnrichmentConfig::default());
    let (events, sink) = collector();

    let result = orch
        .enrich_batch(
            &records(3),
            EnrichOptions::default().with_progress(ProgressVerbosity::Batches, sink),
        )
        .await;

    assert_eq!(result.api_calls, 0);
    assert!(provider.calls().is_empty());
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.status == TierStatus::Skipped));
}

#[tokio::test]
async fn medium_tier_runs_after_simple() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider.clone(), two_tier_config());

    let result = orch.enrich_batch(&records(2), EnrichOptions::default()).await;

    assert_eq!(provider.models(), vec!["gpt-4o-mini", "gpt-4o"]);
    let fields = &result.results["ex-2"];
    assert_eq!(fields["classification.movement"], json!("push"));
    assert_eq!(fields["muscles.primary"], json!(["chest"]));
}

#[tokio::test]
async fn tier_filter_runs_only_that_tier() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider.clone(), two_tier_config());
    let (events, sink) = collector();

    let result = orch
        .enrich_batch(
            &records(2),
            EnrichOptions::default()
                .only_tier(TierName::Medium)
                .with_progress(ProgressVerbosity::Tiers, sink),
        )
        .await;

    assert_eq!(provider.models(), vec!["gpt-4o"]);
    assert!(!result.results["ex-1"].contains_key("classification.movement"));
    assert!(result.results["ex-1"].contains_key("muscles.primary"));
    let events = events.lock().unwrap();
    assert!(events.iter().all(|e| e.tier == TierName::Medium));
}

#[tokio::test]
async fn nested_view_groups_dotted_paths() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider, two_tier_config());

    let result = orch.enrich_batch(&records(1), EnrichOptions::default()).await;

    assert_eq!(
        result.nested("ex-1").unwrap(),
        json!({
            "classification": { "movement": "push" },
            "muscles": { "primary": ["chest"] }
        })
    );
    assert!(result.nested("ex-9").is_none());
}

// ── Fallback and failures ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failing_complex_call_walks_the_whole_chain() {
    let provider = Arc::new(ScriptedProvider::failing_from(0));
    let config = EnrichmentConfig::default().with_field(
        "content.instructions",
        FieldConfig::new(TierName::Complex, "instructions"),
    );
    let orch = orchestrator(provider.clone(), config);

    let result = orch.enrich_batch(&records(1), EnrichOptions::default()).await;

    let mut expected = vec!["gpt-4.1"; 3];
    expected.extend(vec!["gpt-4o"; 3]);
    expected.extend(vec!["gpt-4o-mini"; 3]);
    assert_eq!(provider.models(), expected);
    assert_eq!(result.api_calls, 9);
    assert_eq!(result.failed_ids, vec!["ex-1"]);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].tier, TierName::Complex);
    assert_eq!(result.errors[0].prompt, "instructions");
    assert!(result.errors[0].reason.contains("500"));
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_before_each_attempt() {
    let provider = Arc::new(ScriptedProvider::failing_from(0));
    let config = EnrichmentConfig::default().with_field(
        "content.instructions",
        FieldConfig::new(TierName::Complex, "instructions"),
    );
    let orch = orchestrator(provider, config);

    let result = orch.enrich_batch(&records(1), EnrichOptions::default()).await;

    // Exponential from 1s: 1s + 2s of retries at each of three tiers.
    assert_eq!(result.api_calls, 9);
    assert!(result.duration >= Duration::from_secs(9));
    assert!(result.duration < Duration::from_secs(10));
}

#[tokio::test]
async fn record_missing_from_reply_fails_alone() {
    let provider = Arc::new(ScriptedProvider::omitting("gpt-4o-mini", "ex-2"));
    let orch = orchestrator(provider, simple_config(5));

    let result = orch.enrich_batch(&records(3), EnrichOptions::default()).await;

    assert_eq!(result.failed_ids, vec!["ex-2"]);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].reason.contains("missing"));
    assert!(result.results["ex-1"].contains_key("classification.movement"));
    assert!(result.results["ex-3"].contains_key("classification.movement"));
}

#[tokio::test]
async fn defaults_fill_failed_records_when_enabled() {
    let provider = Arc::new(ScriptedProvider::omitting("gpt-4o-mini", "ex-2"));
    let mut config = EnrichmentConfig::default().with_field(
        "classification.level",
        FieldConfig::new(TierName::Simple, "classification").with_default(json!("intermediate")),
    );
    config.fallback.use_defaults = true;
    let orch = orchestrator(provider, config);

    let result = orch.enrich_batch(&records(2), EnrichOptions::default()).await;

    assert_eq!(result.results["ex-1"]["classification.level"], json!("beginner"));
    assert_eq!(result.results["ex-2"]["classification.level"], json!("intermediate"));
    assert_eq!(result.failed_ids, vec!["ex-2"]);
}

#[tokio::test]
async fn failure_in_one_tier_sticks_for_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::omitting("gpt-4o-mini", "ex-2"));
    let orch = orchestrator(provider, two_tier_config());

    let result = orch
        .enrich_batch(
            &records(2),
            EnrichOptions::default().with_output_directory(dir.path()),
        )
        .await;

    // Medium answered for ex-2, but it already failed at simple.
    assert!(result.results["ex-2"].contains_key("muscles.primary"));
    assert_eq!(result.failed_ids, vec!["ex-2"]);

    let mut store = CheckpointStore::new(dir.path(), orch.config().checkpoint.clone());
    let state = store.load().unwrap();
    assert!(state.failed_ids.contains("ex-2"));
    assert!(state.completed_ids.contains("ex-1"));
    assert!(!state.completed_ids.contains("ex-2"));
}

#[tokio::test]
async fn unavailable_provider_disables_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider {
        unavailable: true,
        ..ScriptedProvider::answering()
    });
    let orch = orchestrator(provider.clone(), simple_config(2));

    let result = orch
        .enrich_batch(
            &records(3),
            EnrichOptions::default().with_output_directory(dir.path()),
        )
        .await;

    assert!(!result.enabled);
    assert_eq!(result.api_calls, 0);
    assert!(result.results.is_empty());
    assert!(provider.calls().is_empty());
    assert!(!dir.path().join(CHECKPOINT_FILE_NAME).exists());
}

// ── Checkpoint and resume ──────────────────────────────────────────────

#[tokio::test]
async fn successful_run_clears_its_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider, simple_config(2));

    let result = orch
        .enrich_batch(
            &records(3),
            EnrichOptions::default().with_output_directory(dir.path()),
        )
        .await;

    assert!(result.failed_ids.is_empty());
    assert!(!dir.path().join(CHECKPOINT_FILE_NAME).exists());
}

#[tokio::test]
async fn disabled_checkpointing_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::failing_from(0));
    let mut config = simple_config(2);
    config.fallback.retries_per_tier = 0;
    config.fallback.allow_degrade = false;
    config.checkpoint.enabled = false;
    let orch = orchestrator(provider, config);

    let result = orch
        .enrich_batch(
            &records(2),
            EnrichOptions::default().with_output_directory(dir.path()),
        )
        .await;

    assert_eq!(result.failed_ids.len(), 2);
    assert!(!dir.path().join(CHECKPOINT_FILE_NAME).exists());
}

fn resumable_config() -> EnrichmentConfig {
    let mut config = simple_config(2);
    config.fallback.retries_per_tier = 0;
    config.fallback.allow_degrade = false;
    config
}

/// First batch succeeds, the rest fail; leaves a checkpoint behind.
async fn interrupted_run(dir: &std::path::Path) {
    let provider = Arc::new(ScriptedProvider::failing_from(1));
    let orch = orchestrator(provider.clone(), resumable_config());
    let result = orch
        .enrich_batch(
            &records(5),
            EnrichOptions::default()
                .with_output_directory(dir)
                .with_source_name("exercises.json"),
        )
        .await;
    assert_eq!(provider.calls().len(), 3);
    assert_eq!(result.failed_ids, vec!["ex-3", "ex-4", "ex-5"]);
    assert!(dir.join(CHECKPOINT_FILE_NAME).exists());
}

#[tokio::test]
async fn resume_processes_only_unfinished_records() {
    let dir = tempfile::tempdir().unwrap();
    interrupted_run(dir.path()).await;

    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider.clone(), resumable_config());
    let result = orch
        .enrich_batch(
            &records(5),
            EnrichOptions::default()
                .with_output_directory(dir.path())
                .resuming(),
        )
        .await;

    assert_eq!(result.resume, ResumeStatus::Resumed { skipped: 2 });
    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].ids, vec!["ex-3", "ex-4"]);
    assert_eq!(calls[1].ids, vec!["ex-5"]);

    assert_eq!(result.results.len(), 5);
    for id in ["ex-1", "ex-2", "ex-3", "ex-4", "ex-5"] {
        assert_eq!(result.results[id]["classification.movement"], json!("push"));
    }
    assert!(result.failed_ids.is_empty());
    assert!(!dir.path().join(CHECKPOINT_FILE_NAME).exists());
}

#[tokio::test]
async fn fully_covered_resume_returns_without_work() {
    let dir = tempfile::tempdir().unwrap();
    let config = resumable_config();
    let mut store = CheckpointStore::new(dir.path(), config.checkpoint.clone());
    store.initialize("exercises.json", 2, &config).unwrap();
    for id in ["ex-1", "ex-2"] {
        let values = FieldValues::from([("classification.movement".to_string(), json!("pull"))]);
        store.update(id, true, TierName::Simple, Some(values)).unwrap();
    }
    store.force_save().unwrap();

    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider.clone(), config);
    let (events, sink) = collector();
    let result = orch
        .enrich_batch(
            &records(2),
            EnrichOptions::default()
                .with_output_directory(dir.path())
                .resuming()
                .with_progress(ProgressVerbosity::Batches, sink),
        )
        .await;

    assert_eq!(result.resume, ResumeStatus::Resumed { skipped: 2 });
    assert!(provider.calls().is_empty());
    assert_eq!(result.api_calls, 0);
    assert_eq!(result.results.len(), 2);
    assert_eq!(result.results["ex-2"]["classification.movement"], json!("pull"));
    assert!(events.lock().unwrap().is_empty());
    assert!(dir.path().join(CHECKPOINT_FILE_NAME).exists());
}

#[tokio::test]
async fn changed_configuration_discards_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    interrupted_run(dir.path()).await;

    let provider = Arc::new(ScriptedProvider::answering());
    let mut config = resumable_config();
    config.tiers.get_mut(TierName::Simple).model = "gpt-4.1-mini".into();
    let orch = orchestrator(provider.clone(), config);
    let result = orch
        .enrich_batch(
            &records(5),
            EnrichOptions::default()
                .with_output_directory(dir.path())
                .resuming(),
        )
        .await;

    assert!(matches!(result.resume, ResumeStatus::Discarded { .. }));
    assert_eq!(provider.calls().len(), 3);
    assert_eq!(result.results.len(), 5);
}

#[tokio::test]
async fn without_resume_flag_the_checkpoint_is_restarted() {
    let dir = tempfile::tempdir().unwrap();
    interrupted_run(dir.path()).await;

    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider.clone(), resumable_config());
    let result = orch
        .enrich_batch(
            &records(5),
            EnrichOptions::default().with_output_directory(dir.path()),
        )
        .await;

    assert_eq!(result.resume, ResumeStatus::Fresh);
    assert_eq!(provider.calls().len(), 3);
}

// ── Progress ───────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_verbosity_reports_every_batch() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider, simple_config(2));
    let (events, sink) = collector();

    orch.enrich_batch(
        &records(3),
        EnrichOptions::default().with_progress(ProgressVerbosity::Batches, sink),
    )
    .await;

    let events = events.lock().unwrap();
    let statuses: Vec<(TierName, TierStatus)> = events.iter().map(|e| (e.tier, e.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (TierName::Simple, TierStatus::Started),
            (TierName::Simple, TierStatus::BatchCompleted),
            (TierName::Simple, TierStatus::BatchCompleted),
            (TierName::Simple, TierStatus::Completed),
            (TierName::Medium, TierStatus::Skipped),
            (TierName::Complex, TierStatus::Skipped),
        ]
    );
    assert_eq!((events[1].current, events[1].total), (2, 3));
    assert_eq!((events[2].current, events[2].total), (3, 3));
    assert_eq!(events[3].api_calls, 2);
    assert!((events[3].percent - 100.0).abs() < 1e-9);
    assert!(events[1].remaining.is_some());
}

#[tokio::test]
async fn tier_verbosity_hides_batch_events() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider, simple_config(2));
    let (events, sink) = collector();

    orch.enrich_batch(
        &records(3),
        EnrichOptions::default().with_progress(ProgressVerbosity::Tiers, sink),
    )
    .await;

    let events = events.lock().unwrap();
    assert!(events.iter().all(|e| e.status != TierStatus::BatchCompleted));
    assert_eq!(events.len(), 4);
}

// ── Cost ───────────────────────────────────────────────────────────────

#[test]
fn orchestrator_estimates_cost_for_its_configuration() {
    let provider = Arc::new(ScriptedProvider::answering());
    let orch = orchestrator(provider, two_tier_config());

    let estimate = orch.estimate_cost(40);
    // simple batch 20 -> 2 calls, medium batch 10 -> 4 calls
    assert_eq!(estimate.total_api_calls, 6);
    let doubled = orch.estimate_cost(80);
    assert!((doubled.total_cost_usd - estimate.total_cost_usd * 2.0).abs() < 1e-9);
}
