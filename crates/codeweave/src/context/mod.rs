//! Context window budgeting.
//!
//! Every backend call has to fit prompt and output inside the model's context
//! window, and the only view we have of the prompt's size is an estimate.
//!
//! 1. **[`estimator`]** — [`TokenEstimator`] turns text into an approximate
//!    token count for a model. Exact or calibrated [`TokenCounter`]s can be
//!    registered per model; everything else uses a word/char heuristic.
//!
//! 2. **[`budget`]** — [`BudgetAllocator`] turns that estimate, the model's
//!    context size and a safety buffer into the `max_tokens` for one call,
//!    never going below a 256-token floor.
//!
//! The [`PagedCompletionEngine`](crate::paging::PagedCompletionEngine)
//! consults the allocator before every page, using the prompt for that page.

pub mod budget;
pub mod estimator;

pub use budget::{
    BudgetAllocator, DEFAULT_SAFETY_BUFFER, LARGE_CONTEXT_SAFETY_BUFFER, MIN_OUTPUT_TOKENS,
    default_buffer_for,
};
pub use estimator::{CharRatioCounter, TokenCounter, TokenEstimator, heuristic_token_count};
