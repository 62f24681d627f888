//! Escalation of answers where the model gave up.
//!
//! After a session ends, [`Escalator::review`] scans the committed text for
//! hedging language ("not sure", "unable", ...). A hit is appended to the
//! JSONL [`EscalationLog`] and announced through a [`Notifier`]. Both steps
//! are best effort: failures are logged and never reach the caller.

pub mod log;
pub mod notify;

pub use self::log::EscalationLog;
pub use notify::{NotifyFuture, Notifier, WebhookNotifier, WEBHOOK_URL_ENV};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::paging::CompletionRequest;

/// Phrases that mark an answer as unresolved. Matched case-insensitively.
pub const HEDGING_PHRASES: &[&str] = &[
    "not sure",
    "unable",
    "doesn't seem",
    "does not seem",
    "not certain",
    "cannot determine",
    "i don't know",
];

/// Whether `text` reads like the model could not resolve the task.
pub fn is_unresolved(text: &str) -> bool {
    let text = text.to_lowercase().replace('\u{2019}', "'");
    HEDGING_PHRASES.iter().any(|phrase| text.contains(phrase))
}

#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("failed to serialize escalation record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write escalation log: {0}")]
    Io(#[from] std::io::Error),
    #[error("notification failed: {0}")]
    Notify(String),
}

/// One line of the escalation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub request_id: String,
    pub tool: String,
    /// What the user asked for.
    pub prompt: String,
    pub context: Option<String>,
    /// The templated prompt the first page was sent.
    pub rendered_prompt: String,
    pub classification: Option<String>,
    pub response: String,
}

impl EscalationRecord {
    pub fn new(request: &CompletionRequest, response: &str) -> Self {
        let origin = request.origin.clone().unwrap_or_default();
        let prompt = if origin.prompt.is_empty() {
            request.prompt.clone()
        } else {
            origin.prompt
        };
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: request.request_id.clone(),
            tool: origin.tool,
            prompt,
            context: origin.context,
            rendered_prompt: request.prompt.clone(),
            classification: origin.classification,
            response: response.to_string(),
        }
    }
}

/// Reviews finished sessions. Shared by every request behind an `Arc`.
#[derive(Default)]
pub struct Escalator {
    log: Option<EscalationLog>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Escalator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: EscalationLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Record and announce `response` if it is unresolved.
    ///
    /// Returns whether the response was escalated. Never fails.
    pub async fn review(&self, request: &CompletionRequest, response: &str) -> bool {
        if !is_unresolved(response) {
            return false;
        }
        info!("[{}] Unresolved response, escalating", request.request_id);
        let record = EscalationRecord::new(request, response);

        if let Some(log) = &self.log
            && let Err(e) = log.append(&record).await
        {
            warn!("[{}] {e}", request.request_id);
        }
        if let Some(notifier) = &self.notifier
            && let Err(e) = notifier.notify(&record).await
        {
            warn!("[{}] {e}", request.request_id);
        }
        true
    }
}
