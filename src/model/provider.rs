//! Cloud caption provider contract
//!
//! Providers turn image bytes into a caption plus the accounting the rate
//! limiter needs: actual USD cost and token usage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ModelResult;

/// Response from a cloud caption provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudCaption {
    pub caption: String,
    pub model: String,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Per-model USD pricing per million tokens
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    /// Cost for the given usage, rounded to six decimal places the way
    /// provider invoices are.
    pub fn cost_usd(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        let input = (tokens_in as f64 / 1_000_000.0) * self.input_per_million;
        let output = (tokens_out as f64 / 1_000_000.0) * self.output_per_million;
        ((input + output) * 1_000_000.0).round() / 1_000_000.0
    }
}

/// External vision API adapter. Implementations do not consult the breaker
/// or the limiter; the executor owns admission.
#[async_trait]
pub trait CloudCaptionProvider: Send + Sync {
    /// Generate a caption for the image
    async fn caption(&self, image: &[u8]) -> ModelResult<CloudCaption>;

    /// Provider label for metrics
    fn name(&self) -> &'static str;

    /// Model identifier for metrics and cost attribution
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_calculation() {
        let pricing = Pricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        };
        // 1000 input + 100 output tokens of gpt-4o-mini class pricing
        let cost = pricing.cost_usd(1000, 100);
        assert!((cost - 0.00021).abs() < 1e-9);
    }

    #[test]
    fn test_cost_rounding() {
        let pricing = Pricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        };
        let cost = pricing.cost_usd(1, 1);
        // Sub-microdollar usage rounds to six decimals
        assert_eq!(cost, 0.000001);
    }
}
