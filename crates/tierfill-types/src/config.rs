//! Enrichment configuration types.
//!
//! Defines the schema consumed by the orchestrator: one [`TierConfig`] per
//! tier, a map of output field path to [`FieldConfig`], and the fallback,
//! rate-limit and checkpoint policies. All types accept both `snake_case`
//! and `camelCase` field names in JSON via `#[serde(alias)]`. Unknown fields
//! are silently ignored for forward compatibility, and every section falls
//! back to its default when absent.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tier::TierName;

// ── TierConfig ───────────────────────────────────────────────────────────

/// Model and batching settings for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Model identifier sent to the completion endpoint (e.g. `"gpt-4o-mini"`).
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum number of tokens the model may generate per call.
    #[serde(default = "default_max_output_tokens", alias = "maxOutputTokens", alias = "maxTokens")]
    pub max_output_tokens: u32,

    /// Number of records sent in one prompt.
    #[serde(default = "default_batch_size", alias = "batchSize")]
    pub batch_size: usize,

    /// Free-form priority label (e.g. `"speed"`, `"accuracy"`).
    #[serde(default = "default_priority")]
    pub priority: String,

    /// System prompt used for calls made at this tier, including calls that
    /// were degraded into it. `None` uses the built-in prompt for the tier.
    #[serde(default, alias = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_batch_size() -> usize {
    10
}

fn default_priority() -> String {
    "normal".into()
}

impl TierConfig {
    /// Built-in settings for a tier.
    pub fn default_for(tier: TierName) -> Self {
        match tier {
            TierName::Simple => Self {
                model: "gpt-4o-mini".into(),
                temperature: 0.1,
                max_output_tokens: 2048,
                batch_size: 20,
                priority: "speed".into(),
                system_prompt: None,
            },
            TierName::Medium => Self {
                model: "gpt-4o".into(),
                temperature: 0.2,
                max_output_tokens: 3072,
                batch_size: 10,
                priority: "balanced".into(),
                system_prompt: None,
            },
            TierName::Complex => Self {
                model: "gpt-4.1".into(),
                temperature: 0.3,
                max_output_tokens: 4096,
                batch_size: 5,
                priority: "accuracy".into(),
                system_prompt: None,
            },
        }
    }

    /// The system prompt for calls at `tier`: the configured one, or the
    /// built-in default.
    pub fn effective_system_prompt(&self, tier: TierName) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or_else(|| default_system_prompt(tier))
    }
}

/// Built-in system prompt per tier.
pub fn default_system_prompt(tier: TierName) -> &'static str {
    match tier {
        TierName::Simple => {
            "You fill in short, factual catalogue fields. Answer concisely and pick \
             from the allowed values whenever a list is given."
        }
        TierName::Medium => {
            "You are a careful domain specialist filling in catalogue fields. Use the \
             record name, description and context; prefer precise, conventional terms."
        }
        TierName::Complex => {
            "You are an expert author producing accurate, complete catalogue content. \
             Reason about each record individually and write clear, specific answers."
        }
    }
}

// ── TierSet ──────────────────────────────────────────────────────────────

/// One [`TierConfig`] per tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSet {
    /// Settings for the `simple` tier.
    #[serde(default = "default_simple_tier")]
    pub simple: TierConfig,
    /// Settings for the `medium` tier.
    #[serde(default = "default_medium_tier")]
    pub medium: TierConfig,
    /// Settings for the `complex` tier.
    #[serde(default = "default_complex_tier")]
    pub complex: TierConfig,
}

fn default_simple_tier() -> TierConfig {
    TierConfig::default_for(TierName::Simple)
}

fn default_medium_tier() -> TierConfig {
    TierConfig::default_for(TierName::Medium)
}

fn default_complex_tier() -> TierConfig {
    TierConfig::default_for(TierName::Complex)
}

impl Default for TierSet {
    fn default() -> Self {
        Self {
            simple: default_simple_tier(),
            medium: default_medium_tier(),
            complex: default_complex_tier(),
        }
    }
}

impl TierSet {
    /// Settings for `tier`.
    pub fn get(&self, tier: TierName) -> &TierConfig {
        match tier {
            TierName::Simple => &self.simple,
            TierName::Medium => &self.medium,
            TierName::Complex => &self.complex,
        }
    }

    /// Mutable settings for `tier`.
    pub fn get_mut(&mut self, tier: TierName) -> &mut TierConfig {
        match tier {
            TierName::Simple => &mut self.simple,
            TierName::Medium => &mut self.medium,
            TierName::Complex => &mut self.complex,
        }
    }
}

// ── FieldConfig ──────────────────────────────────────────────────────────

/// How one output field is filled in.
///
/// Keyed in [`EnrichmentConfig::fields`] by the dotted output path
/// (e.g. `"classification.movement"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Tier whose model fills this field.
    pub tier: TierName,

    /// Id of the prompt template that asks for this field.
    #[serde(alias = "promptId", alias = "prompt_id")]
    pub prompt: String,

    /// Allowed values. Answers outside the list are discarded.
    #[serde(default, rename = "enum", alias = "allowedValues", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,

    /// A record whose reply lacks this field is counted as failed.
    #[serde(default)]
    pub required: bool,

    /// Value filled in when the prompt fails and `fallback.use_defaults` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl FieldConfig {
    /// A non-required, unconstrained field.
    pub fn new(tier: TierName, prompt: impl Into<String>) -> Self {
        Self {
            tier,
            prompt: prompt.into(),
            allowed_values: None,
            required: false,
            default: None,
        }
    }

    /// Builder: restrict answers to `values`.
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: set the fallback default value.
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

// ── FallbackPolicy ───────────────────────────────────────────────────────

/// Retry and degrade behavior when a tier keeps failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    /// Extra attempts at the same tier before degrading.
    #[serde(default = "default_retries_per_tier", alias = "retriesPerTier", alias = "retries")]
    pub retries_per_tier: u32,

    /// Whether a failing tier may hand its prompt to the next cheaper tier.
    #[serde(default = "default_true", alias = "allowDegrade", alias = "degradeOnFailure")]
    pub allow_degrade: bool,

    /// Fill configured field defaults for records whose prompt failed.
    #[serde(default, alias = "useDefaults")]
    pub use_defaults: bool,

    /// Degrade order, most expensive first. The last entry is terminal.
    #[serde(default = "default_degrade_chain", alias = "degradeChain")]
    pub degrade_chain: Vec<TierName>,
}

fn default_retries_per_tier() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_degrade_chain() -> Vec<TierName> {
    vec![TierName::Complex, TierName::Medium, TierName::Simple]
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            retries_per_tier: default_retries_per_tier(),
            allow_degrade: true,
            use_defaults: false,
            degrade_chain: default_degrade_chain(),
        }
    }
}

impl FallbackPolicy {
    /// The tier a failing `tier` degrades to, or `None` when `tier` is
    /// terminal or not part of the chain.
    pub fn next_tier(&self, tier: TierName) -> Option<TierName> {
        let pos = self.degrade_chain.iter().position(|t| *t == tier)?;
        self.degrade_chain.get(pos + 1).copied()
    }

    /// Number of tiers a call starting at `tier` may visit, including `tier`.
    pub fn chain_len_from(&self, tier: TierName) -> usize {
        if !self.allow_degrade {
            return 1;
        }
        match self.degrade_chain.iter().position(|t| *t == tier) {
            Some(pos) => self.degrade_chain.len() - pos,
            None => 1,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for tier in &self.degrade_chain {
            if !seen.insert(*tier) {
                return Err(ConfigError::InvalidDegradeChain {
                    reason: format!("tier {tier} appears more than once"),
                });
            }
        }
        let descending = self
            .degrade_chain
            .windows(2)
            .all(|w| w[0].ordinal() > w[1].ordinal());
        if !descending {
            return Err(ConfigError::InvalidDegradeChain {
                reason: "chain must run from expensive to cheap tiers".into(),
            });
        }
        Ok(())
    }
}

// ── RateLimitPolicy ──────────────────────────────────────────────────────

/// How the backoff window grows with consecutive throttling signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `initial * 2^(hits - 1)`, capped at the maximum.
    #[default]
    Exponential,
    /// `initial * hits`, capped at the maximum.
    Linear,
    /// Always `initial` (capped at the maximum).
    Fixed,
}

/// Request ceiling and backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum requests in any trailing 60-second window. 0 = unlimited.
    #[serde(default = "default_requests_per_minute", alias = "requestsPerMinute")]
    pub requests_per_minute: u32,

    /// Backoff growth strategy.
    #[serde(default, alias = "backoffStrategy")]
    pub backoff_strategy: BackoffStrategy,

    /// First backoff window, in milliseconds.
    #[serde(default = "default_initial_backoff_ms", alias = "initialBackoffMs")]
    pub initial_backoff_ms: u64,

    /// Upper bound for any backoff window, in milliseconds.
    #[serde(default = "default_max_backoff_ms", alias = "maxBackoffMs")]
    pub max_backoff_ms: u64,
}

fn default_requests_per_minute() -> u32 {
    50
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            backoff_strategy: BackoffStrategy::default(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RateLimitPolicy {
    /// First backoff window.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Backoff ceiling.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

// ── CheckpointPolicy ─────────────────────────────────────────────────────

/// Checkpoint persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    /// Whether progress is persisted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Persist after this many updates. Values below 1 behave as 1.
    #[serde(default = "default_save_interval", alias = "saveInterval", alias = "saveEvery")]
    pub save_interval: u32,
}

fn default_save_interval() -> u32 {
    10
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            save_interval: default_save_interval(),
        }
    }
}

// ── EnrichmentConfig ─────────────────────────────────────────────────────

/// Everything the orchestrator needs to know about a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Per-tier model settings.
    #[serde(default)]
    pub tiers: TierSet,

    /// Output field path -> assignment. Ordered so processing is deterministic.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,

    /// Retry/degrade behavior.
    #[serde(default)]
    pub fallback: FallbackPolicy,

    /// Request ceiling and backoff.
    #[serde(default, alias = "rateLimit", alias = "rateLimiting")]
    pub rate_limit: RateLimitPolicy,

    /// Checkpoint persistence.
    #[serde(default)]
    pub checkpoint: CheckpointPolicy,
}

/// The parts of an [`EnrichmentConfig`] that decide what the model is asked.
///
/// Used as fingerprint input: changing a rate limit or checkpoint interval
/// does not make an existing checkpoint unsafe to resume.
#[derive(Debug, Serialize)]
pub struct FingerprintView<'a> {
    /// Per-tier model settings.
    pub tiers: &'a TierSet,
    /// Field assignments.
    pub fields: &'a BTreeMap<String, FieldConfig>,
}

impl EnrichmentConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder: assign a field.
    pub fn with_field(mut self, path: impl Into<String>, field: FieldConfig) -> Self {
        self.fields.insert(path.into(), field);
        self
    }

    /// Check semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for tier in TierName::ALL {
            let tier_config = self.tiers.get(tier);
            if tier_config.batch_size == 0 {
                return Err(ConfigError::ZeroBatchSize { tier });
            }
            if tier_config.model.trim().is_empty() {
                return Err(ConfigError::MissingModel { tier });
            }
        }

        self.fallback.validate()?;

        for (path, field) in &self.fields {
            if path.trim().is_empty() {
                return Err(ConfigError::InvalidField {
                    path: path.clone(),
                    reason: "empty output path".into(),
                });
            }
            if field.prompt.trim().is_empty() {
                return Err(ConfigError::InvalidField {
                    path: path.clone(),
                    reason: "empty prompt id".into(),
                });
            }
            if let Some(values) = &field.allowed_values
                && values.is_empty()
            {
                return Err(ConfigError::InvalidField {
                    path: path.clone(),
                    reason: "enum constraint has no values".into(),
                });
            }
        }
        Ok(())
    }

    /// Field assignments owned by `tier`, in path order.
    pub fn fields_for_tier(&self, tier: TierName) -> impl Iterator<Item = (&String, &FieldConfig)> {
        self.fields.iter().filter(move |(_, f)| f.tier == tier)
    }

    /// Tiers that own at least one field, in processing order.
    pub fn active_tiers(&self) -> Vec<TierName> {
        TierName::ALL
            .into_iter()
            .filter(|tier| self.fields.values().any(|f| f.tier == *tier))
            .collect()
    }

    /// Distinct prompt ids used by `tier`, ordered by their first field path.
    pub fn prompts_for_tier(&self, tier: TierName) -> Vec<&str> {
        let mut prompts: Vec<&str> = Vec::new();
        for (_, field) in self.fields_for_tier(tier) {
            if !prompts.contains(&field.prompt.as_str()) {
                prompts.push(field.prompt.as_str());
            }
        }
        prompts
    }

    /// The fingerprint input for this configuration.
    pub fn fingerprint_view(&self) -> FingerprintView<'_> {
        FingerprintView {
            tiers: &self.tiers,
            fields: &self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EnrichmentConfig::default();
        config.validate().unwrap();
        assert!(config.fields.is_empty());
        assert_eq!(config.tiers.simple.batch_size, 20);
        assert_eq!(config.tiers.complex.batch_size, 5);
        assert_eq!(config.rate_limit.requests_per_minute, 50);
        assert!(config.checkpoint.enabled);
        assert_eq!(config.checkpoint.save_interval, 10);
    }

    #[test]
    fn deserialize_camel_case_and_partial_sections() {
        let json = r#"{
            "tiers": { "simple": { "model": "tiny", "batchSize": 4 } },
            "fields": {
                "classification.movement": {
                    "tier": "simple",
                    "promptId": "classification",
                    "enum": ["push", "pull"],
                    "required": true
                }
            },
            "rateLimit": { "requestsPerMinute": 12, "backoffStrategy": "linear" },
            "checkpoint": { "saveInterval": 3 },
            "somethingUnknown": 1
        }"#;
        let config = EnrichmentConfig::from_json_str(json).unwrap();
        assert_eq!(config.tiers.simple.model, "tiny");
        assert_eq!(config.tiers.simple.batch_size, 4);
        // Unspecified tiers keep their built-in settings.
        assert_eq!(config.tiers.medium, TierConfig::default_for(TierName::Medium));
        let field = &config.fields["classification.movement"];
        assert_eq!(field.prompt, "classification");
        assert_eq!(field.allowed_values.as_deref().unwrap(), ["push", "pull"]);
        assert!(field.required);
        assert_eq!(config.rate_limit.requests_per_minute, 12);
        assert_eq!(config.rate_limit.backoff_strategy, BackoffStrategy::Linear);
        assert_eq!(config.checkpoint.save_interval, 3);
        assert!(config.checkpoint.enabled);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut config = EnrichmentConfig::default();
        config.tiers.get_mut(TierName::Medium).batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroBatchSize {
                tier: TierName::Medium
            })
        ));
    }

    #[test]
    fn degrade_chain_must_descend() {
        let mut config = EnrichmentConfig::default();
        config.fallback.degrade_chain = vec![TierName::Simple, TierName::Complex];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDegradeChain { .. })
        ));

        config.fallback.degrade_chain = vec![TierName::Medium, TierName::Medium];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDegradeChain { .. })
        ));
    }

    #[test]
    fn empty_enum_rejected() {
        let config = EnrichmentConfig::default().with_field(
            "a.b",
            FieldConfig::new(TierName::Simple, "p").with_allowed_values(Vec::<String>::new()),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { .. })
        ));
    }

    #[test]
    fn next_tier_walks_chain() {
        let policy = FallbackPolicy::default();
        assert_eq!(policy.next_tier(TierName::Complex), Some(TierName::Medium));
        assert_eq!(policy.next_tier(TierName::Medium), Some(TierName::Simple));
        assert_eq!(policy.next_tier(TierName::Simple), None);
        assert_eq!(policy.chain_len_from(TierName::Complex), 3);
        assert_eq!(policy.chain_len_from(TierName::Simple), 1);

        let custom = FallbackPolicy {
            degrade_chain: vec![TierName::Complex, TierName::Simple],
            ..FallbackPolicy::default()
        };
        assert_eq!(custom.next_tier(TierName::Complex), Some(TierName::Simple));
        assert_eq!(custom.next_tier(TierName::Medium), None);

        let no_degrade = FallbackPolicy {
            allow_degrade: false,
            ..FallbackPolicy::default()
        };
        assert_eq!(no_degrade.chain_len_from(TierName::Complex), 1);
    }

    #[test]
    fn prompts_and_active_tiers() {
        let config = EnrichmentConfig::default()
            .with_field("muscles.primary", FieldConfig::new(TierName::Medium, "muscles"))
            .with_field("classification.force", FieldConfig::new(TierName::Simple, "classification"))
            .with_field("classification.level", FieldConfig::new(TierName::Simple, "classification"))
            .with_field("muscles.secondary", FieldConfig::new(TierName::Medium, "muscles"));

        assert_eq!(config.active_tiers(), vec![TierName::Simple, TierName::Medium]);
        assert_eq!(config.prompts_for_tier(TierName::Simple), vec!["classification"]);
        assert_eq!(config.prompts_for_tier(TierName::Medium), vec!["muscles"]);
        assert!(config.prompts_for_tier(TierName::Complex).is_empty());
        assert_eq!(config.fields_for_tier(TierName::Simple).count(), 2);
    }

    #[test]
    fn effective_system_prompt_falls_back_to_builtin() {
        let mut tier = TierConfig::default_for(TierName::Simple);
        assert_eq!(
            tier.effective_system_prompt(TierName::Simple),
            default_system_prompt(TierName::Simple)
        );
        tier.system_prompt = Some("custom".into());
        assert_eq!(tier.effective_system_prompt(TierName::Simple), "custom");
    }

    #[test]
    fn rate_limit_durations() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.initial_backoff(), Duration::from_secs(1));
        assert_eq!(policy.max_backoff(), Duration::from_secs(60));
    }
}
