//! Model profile registry: context window sizes per model identifier.
//!
//! The registry is built once at startup (built-in table, optionally
//! overridden from the service config) and shared read-only behind an `Arc`.
//! Lookups never fail: unknown models get a conservative fallback window.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Context window assumed for models the registry does not know.
pub const FALLBACK_CONTEXT_TOKENS: u32 = 8_192;

/// Static facts about one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Model identifier as sent to the backend (e.g. `"openai/gpt-4o"`).
    pub id: String,
    /// Maximum context window in tokens (prompt + output).
    pub max_context: u32,
    /// Calibrated characters-per-token ratio. When set, the token estimator
    /// uses it instead of the word/char heuristic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chars_per_token: Option<f64>,
}

impl ModelProfile {
    pub fn new(id: impl Into<String>, max_context: u32) -> Self {
        Self {
            id: id.into(),
            max_context,
            chars_per_token: None,
        }
    }

    /// Attach a calibrated chars-per-token ratio.
    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        self.chars_per_token = Some(ratio);
        self
    }
}

/// Built-in context sizes. Approximate as of early 2026; override through
/// `[[models]]` in the service config when a provider differs.
const BUILTIN_PROFILES: &[(&str, u32)] = &[
    ("openai/gpt-3.5-turbo-0613", 4_096),
    ("openai/gpt-3.5-turbo", 16_385),
    ("openai/gpt-4", 8_192),
    ("openai/gpt-4-turbo", 128_000),
    ("openai/gpt-4o", 128_000),
    ("openai/gpt-4o-mini", 128_000),
    ("anthropic/claude-3.5-haiku", 200_000),
    ("anthropic/claude-sonnet-4", 200_000),
    ("google/gemini-2.5-flash", 1_048_576),
    ("deepseek/deepseek-chat", 64_000),
    ("meta-llama/llama-3.1-8b-instruct", 131_072),
];

/// Immutable map from model identifier to [`ModelProfile`].
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: HashMap<String, ModelProfile>,
    fallback_context: u32,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRegistry {
    /// An empty registry; every lookup falls back.
    pub fn empty() -> Self {
        Self {
            profiles: HashMap::new(),
            fallback_context: FALLBACK_CONTEXT_TOKENS,
        }
    }

    /// Registry populated with the built-in model table.
    pub fn builtin() -> Self {
        BUILTIN_PROFILES
            .iter()
            .fold(Self::empty(), |reg, (id, ctx)| {
                reg.with_profile(ModelProfile::new(*id, *ctx))
            })
    }

    /// Add or replace a profile (builder pattern).
    pub fn with_profile(mut self, profile: ModelProfile) -> Self {
        self.profiles.insert(profile.id.clone(), profile);
        self
    }

    /// Add or replace several profiles, e.g. overrides from a config file.
    pub fn with_profiles(self, profiles: impl IntoIterator<Item = ModelProfile>) -> Self {
        profiles.into_iter().fold(self, Self::with_profile)
    }

    /// Override the context size used for unknown models.
    pub fn with_fallback_context(mut self, tokens: u32) -> Self {
        self.fallback_context = tokens;
        self
    }

    /// Look up a profile.
    ///
    /// Tries the exact identifier first, then matches on the model name after
    /// the last `/` so `"gpt-4o"` and `"openai/gpt-4o"` resolve alike. A name
    /// shared by several providers matches none of them.
    pub fn get(&self, model: &str) -> Option<&ModelProfile> {
        if let Some(profile) = self.profiles.get(model) {
            return Some(profile);
        }
        let name = model.rsplit('/').next().unwrap_or(model);
        let mut matches = self
            .profiles
            .values()
            .filter(|p| p.id.rsplit('/').next().unwrap_or(&p.id) == name);
        match (matches.next(), matches.next()) {
            (Some(profile), None) => Some(profile),
            (Some(_), Some(_)) => {
                debug!("Model name '{name}' is ambiguous in registry");
                None
            }
            _ => None,
        }
    }

    /// Maximum context window for `model`, or the fallback if unknown.
    pub fn max_context(&self, model: &str) -> u32 {
        match self.get(model) {
            Some(profile) => profile.max_context,
            None => {
                debug!(
                    "Model '{model}' not in registry, assuming {} tokens",
                    self.fallback_context
                );
                self.fallback_context
            }
        }
    }

    /// Context size assumed for unknown models.
    pub fn fallback_context(&self) -> u32 {
        self.fallback_context
    }

    /// All registered profiles, sorted by identifier.
    pub fn profiles(&self) -> Vec<&ModelProfile> {
        let mut all: Vec<&ModelProfile> = self.profiles.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_exact() {
        let reg = ProfileRegistry::builtin();
        assert_eq!(reg.max_context("openai/gpt-4o"), 128_000);
        assert_eq!(reg.max_context("openai/gpt-3.5-turbo-0613"), 4_096);
    }

    #[test]
    fn lookup_by_bare_name() {
        let reg = ProfileRegistry::builtin();
        assert_eq!(reg.max_context("claude-sonnet-4"), 200_000);
        assert_eq!(reg.get("gpt-4").map(|p| p.max_context), Some(8_192));
    }

    #[test]
    fn ambiguous_bare_name_matches_nothing() {
        let reg = ProfileRegistry::builtin().with_profile(ModelProfile::new("azure/gpt-4o", 32_000));
        assert!(reg.get("gpt-4o").is_none());
        assert_eq!(reg.max_context("gpt-4o"), FALLBACK_CONTEXT_TOKENS);
        // Full identifiers still resolve exactly.
        assert_eq!(reg.max_context("azure/gpt-4o"), 32_000);
        assert_eq!(reg.max_context("openai/gpt-4o"), 128_000);
    }

    #[test]
    fn unknown_model_uses_fallback() {
        let reg = ProfileRegistry::builtin();
        assert!(reg.get("acme/unknown-model").is_none());
        assert_eq!(reg.max_context("acme/unknown-model"), FALLBACK_CONTEXT_TOKENS);

        let reg = reg.with_fallback_context(2_048);
        assert_eq!(reg.max_context("acme/unknown-model"), 2_048);
    }

    #[test]
    fn overrides_replace_builtin_entries() {
        let reg = ProfileRegistry::builtin().with_profiles(vec![
            ModelProfile::new("openai/gpt-4o", 64_000).with_chars_per_token(3.8),
            ModelProfile::new("local/tiny", 2_048),
        ]);
        assert_eq!(reg.max_context("openai/gpt-4o"), 64_000);
        assert_eq!(reg.get("openai/gpt-4o").unwrap().chars_per_token, Some(3.8));
        assert_eq!(reg.max_context("local/tiny"), 2_048);
    }

    #[test]
    fn profiles_are_sorted() {
        let reg = ProfileRegistry::empty()
            .with_profile(ModelProfile::new("b/model", 1))
            .with_profile(ModelProfile::new("a/model", 2));
        let ids: Vec<&str> = reg.profiles().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a/model", "b/model"]);
    }
}
