//! Up-front cost estimation.
//!
//! Estimates are deliberately rough: every record is assumed to cost a
//! fixed number of prompt and completion tokens per tier, priced from a
//! static per-million-token table.

use std::time::Duration;

use serde::Serialize;

use tierfill_types::{EnrichmentConfig, TierName};

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelPrice {
    /// Prompt tokens.
    pub input_per_million: f64,
    /// Completion tokens.
    pub output_per_million: f64,
}

/// Used for models missing from the table.
pub const DEFAULT_PRICE: ModelPrice = ModelPrice {
    input_per_million: 1.00,
    output_per_million: 3.00,
};

const PRICE_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1", 2.00, 8.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-3-5-sonnet", 3.00, 15.00),
    ("claude-sonnet-4", 3.00, 15.00),
];

/// Assumed prompt tokens per record.
pub fn input_tokens_per_record(tier: TierName) -> u64 {
    match tier {
        TierName::Simple => 200,
        TierName::Medium => 300,
        TierName::Complex => 400,
    }
}

/// Assumed completion tokens per record.
pub fn output_tokens_per_record(tier: TierName) -> u64 {
    match tier {
        TierName::Simple => 50,
        TierName::Medium => 150,
        TierName::Complex => 500,
    }
}

/// Price for `model`. A provider prefix ("openai/") is ignored and the
/// longest matching table entry wins.
pub fn price_for(model: &str) -> ModelPrice {
    let name = model.rsplit('/').next().unwrap_or(model);
    PRICE_TABLE
        .iter()
        .filter(|(prefix, _, _)| name.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, input, output)| ModelPrice {
            input_per_million: *input,
            output_per_million: *output,
        })
        .unwrap_or(DEFAULT_PRICE)
}

/// Estimate for one tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierCostEstimate {
    /// Tier.
    pub tier: TierName,
    /// Model the tier calls.
    pub model: String,
    /// Records the tier would process.
    pub records: usize,
    /// Batches, one call each.
    pub api_calls: u64,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Estimated spend in USD.
    pub cost_usd: f64,
}

/// Estimate for a whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    /// Per active tier, in processing order.
    pub tiers: Vec<TierCostEstimate>,
    /// Sum of tier calls.
    pub total_api_calls: u64,
    /// Sum of prompt and completion tokens.
    pub total_tokens: u64,
    /// Sum of tier costs.
    pub total_cost_usd: f64,
    /// Wall-clock lower bound implied by the request ceiling.
    pub estimated_duration: Duration,
}

/// Estimate calls, tokens, cost and duration for `record_count` records.
///
/// Tiers with no configured fields cost nothing.
pub fn estimate_cost(config: &EnrichmentConfig, record_count: usize) -> CostEstimate {
    let mut tiers = Vec::new();
    for tier in config.active_tiers() {
        let tier_config = config.tiers.get(tier);
        let batch_size = tier_config.batch_size.max(1);
        let api_calls = record_count.div_ceil(batch_size) as u64;
        let input_tokens = record_count as u64 * input_tokens_per_record(tier);
        let output_tokens = record_count as u64 * output_tokens_per_record(tier);
        let price = price_for(&tier_config.model);
        let cost_usd = input_tokens as f64 / 1_000_000.0 * price.input_per_million
            + output_tokens as f64 / 1_000_000.0 * price.output_per_million;

        tiers.push(TierCostEstimate {
            tier,
            model: tier_config.model.clone(),
            records: record_count,
            api_calls,
            input_tokens,
            output_tokens,
            cost_usd,
        });
    }

    let total_api_calls = tiers.iter().map(|t| t.api_calls).sum();
    let total_tokens = tiers.iter().map(|t| t.input_tokens + t.output_tokens).sum();
    let total_cost_usd = tiers.iter().map(|t| t.cost_usd).sum();
    let rpm = config.rate_limit.requests_per_minute;
    let estimated_duration = if rpm == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(total_api_calls as f64 * 60.0 / rpm as f64)
    };

    CostEstimate {
        tiers,
        total_api_calls,
        total_tokens,
        total_cost_usd,
        estimated_duration,
    }
}
