//! Model usage accounting

use serde::{Deserialize, Serialize};

/// Token and price totals reported by model-calling nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    #[serde(default)]
    pub prompt_tokens: u64,

    #[serde(default)]
    pub completion_tokens: u64,

    #[serde(default)]
    pub total_tokens: u64,

    #[serde(default)]
    pub prompt_price: f64,

    #[serde(default)]
    pub completion_price: f64,

    #[serde(default)]
    pub total_price: f64,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Seconds spent waiting on the provider
    #[serde(default)]
    pub latency: f64,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for LlmUsage {
    fn default() -> Self {
        Self::empty()
    }
}

impl LlmUsage {
    pub fn empty() -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            prompt_price: 0.0,
            completion_price: 0.0,
            total_price: 0.0,
            currency: default_currency(),
            latency: 0.0,
        }
    }

    /// Usage with only token counts set
    pub fn from_tokens(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            ..Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.total_price == 0.0
    }

    /// Sum of two usages; the currency of `self` wins unless it is empty
    pub fn plus(&self, other: &LlmUsage) -> LlmUsage {
        if self.is_empty() {
            return other.clone();
        }
        LlmUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            prompt_price: self.prompt_price + other.prompt_price,
            completion_price: self.completion_price + other.completion_price,
            total_price: self.total_price + other.total_price,
            currency: self.currency.clone(),
            latency: self.latency + other.latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plus_accumulates() {
        let a = LlmUsage::from_tokens(10, 5);
        let b = LlmUsage::from_tokens(1, 2);
        let sum = a.plus(&b);
        assert_eq!(sum.prompt_tokens, 11);
        assert_eq!(sum.completion_tokens, 7);
        assert_eq!(sum.total_tokens, 18);
    }

    #[test]
    fn test_plus_on_empty_takes_other() {
        let other = LlmUsage {
            currency: "EUR".into(),
            ..LlmUsage::from_tokens(3, 0)
        };
        assert_eq!(LlmUsage::empty().plus(&other).currency, "EUR");
    }
}
