//! Approximate token counting.
//!
//! There is no tokenizer for most hosted models on this side of the wire, so
//! counts are estimates. Downstream budget math keeps a safety buffer to
//! tolerate error in either direction.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::profile::ProfileRegistry;

/// Characters per token used when a calibrated ratio is unusable.
/// Most tokenizers average 3-4 chars per token on English text.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// A model-specific token counter (an exact tokenizer, or a calibrated ratio).
pub trait TokenCounter: Send + Sync {
    /// Count the tokens in `text`.
    fn count(&self, text: &str) -> usize;
}

/// Counter that divides the character count by a calibrated ratio.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioCounter {
    chars_per_token: f64,
}

impl CharRatioCounter {
    /// Non-positive or non-finite ratios fall back to [`DEFAULT_CHARS_PER_TOKEN`].
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }
}

impl TokenCounter for CharRatioCounter {
    fn count(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }
}

/// Heuristic estimate used when no counter is registered for a model.
///
/// `floor(min(words * 1.3, chars / 4))`, but never less than the word count
/// and never less than 1.
pub fn heuristic_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let chars = text.chars().count();
    let estimate = (words as f64 * 1.3).min(chars as f64 / 4.0).floor() as usize;
    estimate.max(words.max(1))
}

/// Converts text into an approximate token count for a given model.
///
/// Infallible: if no counter is registered for the model, the heuristic in
/// [`heuristic_token_count`] applies.
#[derive(Clone, Default)]
pub struct TokenEstimator {
    counters: HashMap<String, Arc<dyn TokenCounter>>,
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimator with a [`CharRatioCounter`] for every profile that carries a
    /// calibrated `chars_per_token`.
    pub fn from_profiles(profiles: &ProfileRegistry) -> Self {
        profiles
            .profiles()
            .into_iter()
            .filter_map(|p| p.chars_per_token.map(|ratio| (p.id.clone(), ratio)))
            .fold(Self::new(), |est, (id, ratio)| {
                est.with_counter(id, CharRatioCounter::new(ratio))
            })
    }

    /// Register a counter for a model identifier (builder pattern).
    pub fn with_counter(mut self, model: impl Into<String>, counter: impl TokenCounter + 'static) -> Self {
        self.counters.insert(model.into(), Arc::new(counter));
        self
    }

    /// Whether a model-specific counter is registered for `model`.
    pub fn has_counter(&self, model: &str) -> bool {
        self.counters.contains_key(model)
    }

    /// Estimate the token count of `text` for `model`.
    pub fn estimate(&self, model: &str, text: &str) -> usize {
        match self.counters.get(model) {
            Some(counter) => counter.count(text),
            None => heuristic_token_count(text),
        }
    }
}

impl fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut models: Vec<&str> = self.counters.keys().map(String::as_str).collect();
        models.sort_unstable();
        f.debug_struct("TokenEstimator")
            .field("counters", &models)
            .finish()
    }
}
