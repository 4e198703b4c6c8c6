//! Built-in pricing table for the chat models Careline is deployed against.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price. Custom pricing can be added from the `[pricing]` config
//! section; self-hosted models default to zero.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Provider prefixes tried when a bare model name misses.
const PROVIDER_PREFIXES: [&str; 5] = ["openai", "google", "meta-llama", "mistral", "deepseek"];

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let defaults: [(&str, f64, f64); 14] = [
            // OpenAI
            ("openai/gpt-4o", 2.5, 10.0),
            ("openai/gpt-4o-mini", 0.15, 0.6),
            ("openai/gpt-4.1", 2.0, 8.0),
            ("openai/gpt-4.1-mini", 0.4, 1.6),
            ("openai/gpt-4.1-nano", 0.1, 0.4),
            ("openai/gpt-3.5-turbo", 0.5, 1.5),
            // Google (via OpenRouter)
            ("google/gemini-2.0-flash", 0.1, 0.4),
            ("google/gemini-1.5-flash", 0.075, 0.3),
            // Open-weight models (hosted)
            ("meta-llama/llama-3.1-70b", 0.52, 0.75),
            ("meta-llama/llama-3.1-8b", 0.055, 0.055),
            ("mistral/mistral-small", 0.2, 0.6),
            ("deepseek/deepseek-v3", 0.27, 1.1),
            // Self-hosted via Ollama
            ("ollama/llama3.1", 0.0, 0.0),
            ("ollama/qwen2.5", 0.0, 0.0),
        ];

        let prices = defaults
            .into_iter()
            .map(|(name, input, output)| (name.to_string(), ModelPricing::new(input, output)))
            .collect();

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Defaults plus the given `(model, pricing)` overrides.
    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, ModelPricing)>,
    {
        let table = Self::with_defaults();
        for (model, pricing) in overrides {
            table.set(model, pricing);
        }
        table
    }

    /// Look up pricing for a model by exact name.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.read().get(model).cloned()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.into(), pricing);
    }

    /// Resolve pricing with flexible matching.
    ///
    /// Tries exact match first, then common provider prefixes
    /// (`gpt-4o` → `openai/gpt-4o`), then the longest bare key that prefixes
    /// the model (`gpt-4o-mini-2024-07-18` → `gpt-4o-mini`).
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.read();

        if let Some(p) = prices.get(model) {
            return Some(p.clone());
        }

        if let Some(p) = PROVIDER_PREFIXES
            .iter()
            .find_map(|prefix| prices.get(&format!("{prefix}/{model}")))
        {
            return Some(p.clone());
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
                bare_model
                    .starts_with(&bare_key)
                    .then_some((bare_key.len(), pricing))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, p)| p.clone())
    }

    /// Compute cost for a model call, returning 0.0 if the model is unknown.
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.resolve(model)
            .map(|p| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ModelPricing>> {
        self.prices.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
