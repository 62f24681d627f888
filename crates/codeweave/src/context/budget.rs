//! Output budget allocation: how many tokens one backend call may generate.
//!
//! The allocator is consulted before every page, with the prompt that page
//! will actually send. Continuation prompts grow (they carry an anchor of
//! prior output), so later pages can get a smaller ceiling than the first.

use std::sync::Arc;

use tracing::debug;

use super::estimator::TokenEstimator;
use crate::profile::ProfileRegistry;

/// Floor for any output ceiling. A call with less room than this is not
/// worth making, and the backend may reject a tiny `max_tokens`.
pub const MIN_OUTPUT_TOKENS: u32 = 256;

/// Safety buffer for small-context models.
pub const DEFAULT_SAFETY_BUFFER: u32 = 200;

/// Safety buffer for models with at least [`LARGE_CONTEXT_THRESHOLD`] tokens.
pub const LARGE_CONTEXT_SAFETY_BUFFER: u32 = 800;

/// Context size from which the larger safety buffer applies.
pub const LARGE_CONTEXT_THRESHOLD: u32 = 32_000;

/// Default safety buffer for a model whose context window is `max_context`.
pub fn default_buffer_for(max_context: u32) -> u32 {
    if max_context >= LARGE_CONTEXT_THRESHOLD {
        LARGE_CONTEXT_SAFETY_BUFFER
    } else {
        DEFAULT_SAFETY_BUFFER
    }
}

/// Computes the `max_tokens` ceiling for one backend call.
///
/// # Example
///
/// ```ignore
/// let allocator = BudgetAllocator::new(Arc::new(ProfileRegistry::builtin()));
/// let cap = allocator.safe_max_output_tokens("openai/gpt-4o", &prompt, 4096, None);
/// assert!(cap >= MIN_OUTPUT_TOKENS);
/// ```
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    profiles: Arc<ProfileRegistry>,
    estimator: TokenEstimator,
}

impl BudgetAllocator {
    /// Allocator whose estimator uses the registry's calibrated ratios.
    pub fn new(profiles: Arc<ProfileRegistry>) -> Self {
        let estimator = TokenEstimator::from_profiles(&profiles);
        Self {
            profiles,
            estimator,
        }
    }

    /// Replace the token estimator (e.g. to register an exact tokenizer).
    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Default safety buffer for `model`, derived from its context size.
    pub fn default_buffer(&self, model: &str) -> u32 {
        default_buffer_for(self.profiles.max_context(model))
    }

    /// Output ceiling for one call sending `prompt` to `model`.
    ///
    /// `limit - prompt_tokens - buffer`, clamped to `desired_cap`, never
    /// below [`MIN_OUTPUT_TOKENS`]. `buffer = None` uses
    /// [`default_buffer`](Self::default_buffer). Arithmetic saturates, so an
    /// oversized prompt yields the floor rather than an underflow.
    pub fn safe_max_output_tokens(
        &self,
        model: &str,
        prompt: &str,
        desired_cap: u32,
        buffer: Option<u32>,
    ) -> u32 {
        let limit = self.profiles.max_context(model);
        let buffer = buffer.unwrap_or_else(|| default_buffer_for(limit));
        let prompt_tokens = u32::try_from(self.estimator.estimate(model, prompt)).unwrap_or(u32::MAX);

        let remaining = limit
            .saturating_sub(prompt_tokens)
            .saturating_sub(buffer)
            .max(MIN_OUTPUT_TOKENS);
        let result = desired_cap.min(remaining).max(MIN_OUTPUT_TOKENS);

        debug!(
            "Budget for {model}: limit={limit}, prompt~{prompt_tokens}, buffer={buffer}, \
             cap={desired_cap} -> {result}"
        );
        result
    }
}
