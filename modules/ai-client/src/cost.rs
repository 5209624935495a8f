use crate::traits::TokenUsage;

/// Per-token USD pricing for one backend.
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    pub input_per_token: f64,
    pub output_per_token: f64,
}

impl CostModel {
    pub fn new(input_per_token: f64, output_per_token: f64) -> Self {
        Self {
            input_per_token,
            output_per_token,
        }
    }

    /// USD cost of one call, rounded to 6 decimals.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let raw = usage.prompt_tokens as f64 * self.input_per_token
            + usage.completion_tokens as f64 * self.output_per_token;
        (raw * 1_000_000.0).round() / 1_000_000.0
    }
}
