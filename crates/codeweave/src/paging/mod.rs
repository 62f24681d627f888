//! Multi-page streaming completions.
//!
//! - **[`engine`]** — [`PagedCompletionEngine`] runs a session: budget, call,
//!   stream, decide whether to continue.
//! - **[`dedup`]** — [`DedupGuard`] stops sessions whose pages repeat earlier
//!   output.
//! - **[`backend`]** — [`CompletionBackend`], the one-call-per-page seam, with
//!   the OpenRouter implementation and [`ScriptedBackend`] for replays.

pub mod backend;
pub mod dedup;
pub mod engine;

pub use backend::{BackendCall, BackendError, BackendFuture, CompletionBackend, ScriptedBackend, ScriptedPage};
pub use dedup::{DedupGuard, Duplicate, fingerprint, normalize};
pub use engine::{
    CONTINUATION_MARKER, CompletionRequest, DEFAULT_GUARD, DoneReason, Page, PageEvent, PageStream,
    PagedCompletionEngine, PagingConfig, RequestOrigin, SessionOutcome, SessionReport, SessionState,
};
