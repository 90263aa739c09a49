use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// USD per million prompt tokens used for the cost estimate.
pub const PROMPT_COST_PER_MILLION: f64 = 0.1;
/// USD per million completion tokens used for the cost estimate.
pub const COMPLETION_COST_PER_MILLION: f64 = 0.4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self { prompt_tokens, completion_tokens }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(rhs.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(rhs.completion_tokens);
    }
}

/// Running session totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub total_tokens: u64,
    pub total_steps: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
}

impl UsageMetrics {
    pub fn estimated_cost(&self) -> CostEstimate {
        let prompt_cost = self.prompt_tokens as f64 * PROMPT_COST_PER_MILLION / 1_000_000.0;
        let completion_cost =
            self.completion_tokens as f64 * COMPLETION_COST_PER_MILLION / 1_000_000.0;
        CostEstimate { prompt_cost, completion_cost, total_cost: prompt_cost + completion_cost }
    }
}

/// Accumulates token and step counts for one session. Totals only grow until
/// `reset` is called.
#[derive(Clone, Debug, Default)]
pub struct MetricsAggregator {
    totals: UsageMetrics,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, usage: TokenUsage, steps: u64) {
        self.totals.prompt_tokens = self.totals.prompt_tokens.saturating_add(usage.prompt_tokens);
        self.totals.completion_tokens =
            self.totals.completion_tokens.saturating_add(usage.completion_tokens);
        self.totals.total_tokens = self.totals.total_tokens.saturating_add(usage.total());
        self.totals.total_steps = self.totals.total_steps.saturating_add(steps);
    }

    pub fn snapshot(&self) -> UsageMetrics {
        self.totals
    }

    pub fn reset(&mut self) {
        self.totals = UsageMetrics::default();
    }
}
