//! Per-backend model pricing and cost computation.

use serde::{Deserialize, Serialize};

use crate::types::Usage;

/// USD prices for one model, per the owning table's token unit (1K or 1M).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub prompt: f64,
    pub completion: f64,
}

impl ModelPrice {
    pub const fn new(prompt: f64, completion: f64) -> Self {
        Self { prompt, completion }
    }

    /// Embedding models only charge for input.
    pub const fn input_only(prompt: f64) -> Self {
        Self::new(prompt, 0.0)
    }
}

/// Maps model families to prices.
///
/// Lookups accept versioned identifiers (`claude-3-opus-20240229`, `gpt-4o-2024-08-06`,
/// `models/gemini-2.5-pro`): an exact key wins, then the longest key the model starts
/// with, then the longest key contained anywhere in it. A model matching no key has
/// no cost (`None`), which is distinct from a zero cost.
///
/// # Examples
///
/// ```
/// use llm_connectivity::pricing::{ModelPrice, PricingTable};
/// use llm_connectivity::Usage;
///
/// let table = PricingTable::per_million([("claude-3-opus", ModelPrice::new(15.0, 75.0))]);
/// let usage = Usage::new(1_000_000, 1_000_000);
/// assert_eq!(table.cost("claude-3-opus-20240229", &usage), Some(90.0));
/// assert_eq!(table.cost("claude-2.1", &usage), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    unit_tokens: u64,
    entries: Vec<(String, ModelPrice)>,
}

impl PricingTable {
    pub fn new<I, K>(unit_tokens: u64, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ModelPrice)>,
        K: Into<String>,
    {
        Self {
            unit_tokens: unit_tokens.max(1),
            entries: entries
                .into_iter()
                .map(|(model, price)| (model.into(), price))
                .collect(),
        }
    }

    /// Prices quoted per 1,000 tokens.
    pub fn per_thousand<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ModelPrice)>,
        K: Into<String>,
    {
        Self::new(1_000, entries)
    }

    /// Prices quoted per 1,000,000 tokens.
    pub fn per_million<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ModelPrice)>,
        K: Into<String>,
    {
        Self::new(1_000_000, entries)
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        let model = model.into();
        match self.entries.iter_mut().find(|(key, _)| *key == model) {
            Some((_, existing)) => *existing = price,
            None => self.entries.push((model, price)),
        }
    }

    /// Finds the pricing key and price governing `model`.
    pub fn resolve(&self, model: &str) -> Option<(&str, &ModelPrice)> {
        let model = model.strip_prefix("models/").unwrap_or(model);

        let exact = self.entries.iter().find(|(key, _)| key == model);
        let by_prefix = || self.longest_match(|key| model.starts_with(key));
        let by_substring = || self.longest_match(|key| model.contains(key));

        exact
            .or_else(by_prefix)
            .or_else(by_substring)
            .map(|(key, price)| (key.as_str(), price))
    }

    fn longest_match(&self, matches: impl Fn(&str) -> bool) -> Option<&(String, ModelPrice)> {
        self.entries
            .iter()
            .filter(|(key, _)| !key.is_empty() && matches(key))
            .max_by_key(|(key, _)| key.len())
    }

    /// USD cost of `usage` on `model`, `None` when unpriced.
    pub fn cost(&self, model: &str, usage: &Usage) -> Option<f64> {
        let (_, price) = self.resolve(model)?;
        let unit = self.unit_tokens as f64;
        let prompt = usage.prompt_tokens as f64 / unit * price.prompt;
        let completion = usage.completion_tokens as f64 / unit * price.completion;
        Some(prompt + completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai_like() -> PricingTable {
        PricingTable::per_thousand([
            ("gpt-4", ModelPrice::new(0.03, 0.06)),
            ("gpt-4-turbo", ModelPrice::new(0.01, 0.03)),
            ("gpt-4o", ModelPrice::new(0.005, 0.015)),
        ])
    }

    #[test]
    fn million_token_cost() {
        let table = PricingTable::per_million([("claude-3-opus-20240229", ModelPrice::new(15.0, 75.0))]);
        let cost = table
            .cost("claude-3-opus-20240229", &Usage::new(1_000_000, 1_000_000))
            .expect("priced");
        assert!((cost - 90.0).abs() < 1e-9);
    }

    #[test]
    fn longest_prefix_beats_shorter_family() {
        let table = openai_like();
        assert_eq!(table.resolve("gpt-4o-2024-08-06").map(|(k, _)| k), Some("gpt-4o"));
        assert_eq!(table.resolve("gpt-4-turbo-preview").map(|(k, _)| k), Some("gpt-4-turbo"));
        assert_eq!(table.resolve("gpt-4-0613").map(|(k, _)| k), Some("gpt-4"));
    }

    #[test]
    fn substring_and_models_prefix() {
        let table = PricingTable::per_million([("gemini-2.5-pro", ModelPrice::new(1.25, 5.0))]);
        assert!(table.resolve("models/gemini-2.5-pro").is_some());
        assert!(table.resolve("tunedModels/gemini-2.5-pro-custom").is_some());
    }

    #[test]
    fn unlisted_model_has_no_cost() {
        let table = openai_like();
        assert_eq!(table.cost("o1-mini", &Usage::new(10, 10)), None);
        assert_eq!(table.cost("gpt-4o", &Usage::new(0, 0)), Some(0.0));
    }

    #[test]
    fn insert_replaces_existing() {
        let mut table = openai_like();
        table.insert("gpt-4o", ModelPrice::new(1.0, 1.0));
        assert_eq!(table.cost("gpt-4o", &Usage::new(1000, 0)), Some(1.0));
    }
}
