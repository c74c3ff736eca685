//! Token estimation, per-round usage tracking, and cost accounting.
//!
//! The estimator uses the same rough chars-per-token heuristic everywhere so
//! packing decisions and cost estimates stay consistent with each other.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default characters-per-token ratio used by the estimator.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a text using a chars-per-token ratio.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / DEFAULT_CHARS_PER_TOKEN
}

/// Token usage reported by a single provider call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens sent to the model
    pub input_tokens: u64,
    /// Tokens produced by the model
    pub output_tokens: u64,
    /// Tokens served from the provider prompt cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    /// Tokens written into the provider prompt cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    /// Model that served the request
    pub model: String,
    /// Wall time of the request in milliseconds
    pub duration_ms: u64,
}

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Dollars per million input tokens
    pub input_per_mtok: f64,
    /// Dollars per million output tokens
    pub output_per_mtok: f64,
}

static MODEL_PRICING: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        "claude-sonnet-4-5",
        ModelPricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        },
    );
    table.insert(
        "claude-haiku-4-5",
        ModelPricing {
            input_per_mtok: 1.0,
            output_per_mtok: 5.0,
        },
    );
    table.insert(
        "claude-opus-4-1",
        ModelPricing {
            input_per_mtok: 15.0,
            output_per_mtok: 75.0,
        },
    );
    table.insert(
        "gpt-4o",
        ModelPricing {
            input_per_mtok: 2.5,
            output_per_mtok: 10.0,
        },
    );
    table.insert(
        "gpt-4o-mini",
        ModelPricing {
            input_per_mtok: 0.15,
            output_per_mtok: 0.6,
        },
    );
    table
});

/// Look up pricing for a model identifier. Unknown models price at zero.
pub fn pricing_for(model: &str) -> ModelPricing {
    MODEL_PRICING.get(model).copied().unwrap_or(ModelPricing {
        input_per_mtok: 0.0,
        output_per_mtok: 0.0,
    })
}

/// Savings attributable to provider prompt caching for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSavings {
    /// Input tokens that were served from cache instead of re-processed
    pub tokens_saved: u64,
    /// Dollar value of the cached tokens (cached reads cost 10% of fresh input)
    pub dollars_saved: f64,
    /// Fraction of the round's input that came from cache
    pub percent_saved: f64,
}

/// Accumulates usage records per round and answers cost queries.
///
/// Round 5 fans out into several provider calls that all record under round
/// 5; aggregate queries intentionally take the first record for that round.
#[derive(Debug, Default)]
pub struct TokenTracker {
    records: Mutex<Vec<(u8, Usage)>>,
}

impl TokenTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage for a round.
    pub fn record_round(&self, round: u8, usage: Usage) {
        self.records.lock().push((round, usage));
    }

    /// All usage records for a round, in recording order.
    pub fn round_usage(&self, round: u8) -> Vec<Usage> {
        self.records
            .lock()
            .iter()
            .filter(|(r, _)| *r == round)
            .map(|(_, u)| u.clone())
            .collect()
    }

    /// Total input tokens across all rounds.
    pub fn total_input_tokens(&self) -> u64 {
        self.records.lock().iter().map(|(_, u)| u.input_tokens).sum()
    }

    /// Total output tokens across all rounds.
    pub fn total_output_tokens(&self) -> u64 {
        self.records.lock().iter().map(|(_, u)| u.output_tokens).sum()
    }

    /// Dollar cost of one usage record.
    ///
    /// Cached reads bill at 10% of the input price and cache creation at
    /// 125%; both components come out of the pricing table for the model
    /// named in the record.
    pub fn cost_of(usage: &Usage) -> f64 {
        let pricing = pricing_for(&usage.model);
        let in_price = pricing.input_per_mtok / 1_000_000.0;
        let out_price = pricing.output_per_mtok / 1_000_000.0;
        let cache_read = usage.cache_read_tokens.unwrap_or(0);
        let cache_creation = usage.cache_creation_tokens.unwrap_or(0);
        let fresh_input = usage.input_tokens.saturating_sub(cache_read);

        fresh_input as f64 * in_price
            + cache_read as f64 * 0.1 * in_price
            + cache_creation as f64 * 1.25 * in_price
            + usage.output_tokens as f64 * out_price
    }

    /// Total dollar cost across all recorded usage.
    pub fn total_cost(&self) -> f64 {
        self.records.lock().iter().map(|(_, u)| Self::cost_of(u)).sum()
    }

    /// Prompt-cache savings for a round, from its first usage record.
    ///
    /// Returns `None` when the round recorded no usage or no cache reads.
    pub fn round_cache_savings(&self, round: u8) -> Option<CacheSavings> {
        let records = self.records.lock();
        let usage = records.iter().find(|(r, _)| *r == round).map(|(_, u)| u)?;
        let cache_read = usage.cache_read_tokens.unwrap_or(0);
        if cache_read == 0 {
            return None;
        }

        let pricing = pricing_for(&usage.model);
        let in_price = pricing.input_per_mtok / 1_000_000.0;
        let percent = if usage.input_tokens > 0 {
            cache_read as f64 / usage.input_tokens as f64
        } else {
            0.0
        };

        Some(CacheSavings {
            tokens_saved: cache_read,
            dollars_saved: cache_read as f64 * 0.9 * in_price,
            percent_saved: percent,
        })
    }
}
