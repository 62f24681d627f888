//! Convenience re-exports for common `codeweave` types.
//!
//! ```ignore
//! use codeweave::prelude::*;
//! ```
//!
//! Covers wiring up a service or an engine by hand. Decoder internals and
//! dedup helpers are left out; import those from their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatRequest, DEFAULT_MODEL, Message, OpenRouterClient};

// ── Service ─────────────────────────────────────────────────────────
pub use crate::config::{ConfigError, EscalationConfig, ServiceConfig};
pub use crate::policy::{PlanTier, TierPolicy, TierSelection};
pub use crate::render::{PromptRenderer, RenderError, TemplateCatalog, TemplateRenderer};
pub use crate::service::{GenerateRequest, GenerateService};

// ── Paging ──────────────────────────────────────────────────────────
pub use crate::paging::{
    BackendError, CompletionBackend, CompletionRequest, DoneReason, PageEvent, PageStream,
    PagedCompletionEngine, PagingConfig, ScriptedBackend, ScriptedPage, SessionOutcome,
    SessionReport,
};

// ── Budgeting ───────────────────────────────────────────────────────
pub use crate::context::{BudgetAllocator, TokenCounter, TokenEstimator};
pub use crate::profile::{ModelProfile, ProfileRegistry};

// ── Escalation ──────────────────────────────────────────────────────
pub use crate::escalation::{EscalationLog, Escalator, Notifier, WebhookNotifier};
