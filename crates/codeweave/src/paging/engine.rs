//! The paged completion engine.
//!
//! One session turns a rendered prompt into as many backend calls ("pages")
//! as it takes for the model to finish, bounded by `max_pages`:
//!
//! ```text
//! budget -> open stream -> drain (Fragment events) -> empty? -> duplicate?
//!        -> commit (Text event) -> marker / length? -> page limit? -> next prompt
//! ```
//!
//! The first page has nothing to repeat, so its text is committed while it
//! streams, holding back only a tail that could be the start of the marker.
//! Later pages are committed once the dedup guard has seen all of them.
//!
//! The session ends in [`SessionOutcome::Done`] with a [`DoneReason`], or in
//! [`SessionOutcome::Aborted`] when the backend fails; in that case the
//! caller's stream gets a [`PageEvent::Error`] instead of a dropped
//! connection, since the response headers went out with the first fragment.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::backend::{BackendCall, BackendError, CompletionBackend};
use super::dedup::DedupGuard;
use crate::UsageInfo;
use crate::api::streaming::StreamEvent;
use crate::api::tracing::{generate_request_id, page_span_id};
use crate::context::BudgetAllocator;
use crate::escalation::Escalator;

/// Literal the model is told to emit when it runs out of room.
pub const CONTINUATION_MARKER: &str = "[CONTINUE_NEEDED]";

pub const DEFAULT_MAX_PAGES: u32 = 5;

/// Trailing characters of prior output carried into a continuation prompt.
pub const DEFAULT_ANCHOR_CHARS: usize = 3_000;

/// Capacity of the per-session event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// System message sent with every page.
pub const DEFAULT_GUARD: &str = "You are a senior engineer writing production-ready code and \
configuration. Never recommend disabling security controls, hard-coding credentials, \
granting wildcard permissions, or exposing services publicly without authentication. \
If you run out of room before the answer is complete, stop at a clean boundary and end \
your reply with the exact text [CONTINUE_NEEDED].";

/// Instruction inserted between the original prompt and the anchor.
pub const CONTINUE_INSTRUCTION: &str = "Your previous reply was cut off. Continue exactly \
where it stopped. Do not repeat anything already written and do not start over. \
The previous reply ended with:";

const TRUNCATION_NOTE: &str = "\n[truncated: page limit reached]\n";

// ── Configuration ──────────────────────────────────────────────────

/// Engine settings shared by every session. Loaded from `[paging]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Maximum backend calls per session (at least 1).
    pub max_pages: u32,
    /// Characters of accumulated text carried into continuation prompts.
    pub anchor_chars: usize,
    /// Continuation marker.
    pub marker: String,
    /// Hard-stop sequences passed to the backend.
    pub stop_markers: Vec<String>,
    /// System guard instruction.
    pub guard: String,
    pub temperature: f32,
    /// Emit [`PageEvent::Truncated`] when the page limit cuts a session short.
    pub signal_truncation: bool,
    /// Treat `finish_reason = "length"` like the marker.
    pub continue_on_length: bool,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            anchor_chars: DEFAULT_ANCHOR_CHARS,
            marker: CONTINUATION_MARKER.to_string(),
            stop_markers: Vec::new(),
            guard: DEFAULT_GUARD.to_string(),
            temperature: 0.2,
            signal_truncation: true,
            continue_on_length: true,
        }
    }
}

impl PagingConfig {
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_anchor_chars(mut self, chars: usize) -> Self {
        self.anchor_chars = chars;
        self
    }

    pub fn with_stop_markers(mut self, markers: Vec<String>) -> Self {
        self.stop_markers = markers;
        self
    }

    pub fn with_signal_truncation(mut self, enabled: bool) -> Self {
        self.signal_truncation = enabled;
        self
    }
}

// ── Request ────────────────────────────────────────────────────────

/// Where a request came from. Only the escalator reads this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOrigin {
    pub tool: String,
    /// The user's prompt before rendering.
    pub prompt: String,
    pub context: Option<String>,
    pub classification: Option<String>,
}

/// One logical generate request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub request_id: String,
    pub model: String,
    /// Rendered prompt for the first page.
    pub prompt: String,
    /// Overrides [`PagingConfig::guard`].
    pub guard: Option<String>,
    pub desired_cap: u32,
    /// Overrides the model's default safety buffer.
    pub buffer: Option<u32>,
    /// Overrides [`PagingConfig::max_pages`].
    pub max_pages: Option<u32>,
    pub origin: Option<RequestOrigin>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, desired_cap: u32) -> Self {
        Self {
            request_id: generate_request_id(),
            model: model.into(),
            prompt: prompt.into(),
            guard: None,
            desired_cap,
            buffer: None,
            max_pages: None,
            origin: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn with_buffer(mut self, buffer: u32) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_origin(mut self, origin: RequestOrigin) -> Self {
        self.origin = Some(origin);
        self
    }
}

// ── Pages, events, outcomes ────────────────────────────────────────

/// Output of one backend call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub number: u32,
    pub text: String,
    pub fragments: Vec<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageInfo>,
}

impl Page {
    fn new(number: u32) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    fn push_fragment(&mut self, fragment: String) {
        self.text.push_str(&fragment);
        self.fragments.push(fragment);
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Request-local paging state.
#[derive(Debug)]
pub struct SessionState {
    /// Committed text, marker removed.
    pub accumulated: String,
    /// Current page, starting at 1.
    pub page: u32,
    /// Prompt for the current page.
    pub prompt: String,
    dedup: DedupGuard,
}

impl SessionState {
    fn new(prompt: &str) -> Self {
        Self {
            accumulated: String::new(),
            page: 1,
            prompt: prompt.to_string(),
            dedup: DedupGuard::new(),
        }
    }
}

/// What the caller sees, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// Raw streamed text, forwarded as it arrives. May later be discarded
    /// (duplicate page) and still contains the marker.
    Fragment { page: u32, text: String },
    /// Text committed to the result. A page may commit in several pieces.
    Text { page: u32, text: String },
    /// The page limit stopped a session the model wanted to continue.
    Truncated { pages: u32 },
    /// The backend failed; no further events follow.
    Error(String),
}

impl PageEvent {
    /// The text this event contributes to a plain-text response body.
    pub fn body_chunk(&self) -> Option<String> {
        match self {
            PageEvent::Fragment { .. } => None,
            PageEvent::Text { text, .. } => Some(text.clone()),
            PageEvent::Truncated { .. } => Some(TRUNCATION_NOTE.to_string()),
            PageEvent::Error(message) => Some(format!("\n[error] {message}\n")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// The model finished without asking to continue.
    Finished,
    EmptyPage,
    /// A page repeated earlier output and was dropped.
    Duplicate,
    PageLimit,
    /// The consumer went away.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Done(DoneReason),
    Aborted(BackendError),
}

impl SessionOutcome {
    /// Sessions that ran to a natural end get reviewed by the escalator.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, SessionOutcome::Done(reason) if *reason != DoneReason::Cancelled)
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub request_id: String,
    pub outcome: SessionOutcome,
    /// Backend calls made.
    pub calls: u32,
    /// All committed text.
    pub text: String,
}

// ── Event stream ───────────────────────────────────────────────────

/// Events of a spawned session.
///
/// Dropping the stream cancels the session at its next suspension point,
/// including an in-flight backend read.
pub struct PageStream {
    rx: mpsc::Receiver<PageEvent>,
    task: JoinHandle<SessionReport>,
}

impl PageStream {
    /// Wait for the session task and return its report.
    ///
    /// Stops receiving first, so calling this before the stream is exhausted
    /// cancels the session.
    pub async fn into_report(self) -> Option<SessionReport> {
        let PageStream { rx, task } = self;
        drop(rx);
        match task.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Paging task failed: {e}");
                None
            }
        }
    }

    /// Drain every event, then return them with the report.
    pub async fn collect_all(mut self) -> (Vec<PageEvent>, Option<SessionReport>) {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        (events, self.into_report().await)
    }
}

impl Stream for PageStream {
    type Item = PageEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PageEvent>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Drives paged sessions against one backend.
///
/// # Example
///
/// ```ignore
/// let engine = PagedCompletionEngine::new(backend, allocator, PagingConfig::default());
/// let mut events = engine.spawn(CompletionRequest::new("openai/gpt-4o", prompt, 4096));
/// while let Some(event) = events.next().await {
///     if let Some(chunk) = event.body_chunk() {
///         print!("{chunk}");
///     }
/// }
/// ```
#[derive(Clone)]
pub struct PagedCompletionEngine {
    backend: Arc<dyn CompletionBackend>,
    allocator: Arc<BudgetAllocator>,
    config: PagingConfig,
    escalator: Option<Arc<Escalator>>,
}

/// Whether the consumer is still listening.
enum Delivery {
    Delivered,
    Closed,
}

impl PagedCompletionEngine {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        allocator: Arc<BudgetAllocator>,
        config: PagingConfig,
    ) -> Self {
        Self {
            backend,
            allocator,
            config,
            escalator: None,
        }
    }

    /// Review finished sessions for unresolved answers.
    pub fn with_escalator(mut self, escalator: Arc<Escalator>) -> Self {
        self.escalator = Some(escalator);
        self
    }

    pub fn config(&self) -> &PagingConfig {
        &self.config
    }

    /// Run a session on its own task.
    ///
    /// The escalator runs after the event channel is closed, so it never
    /// holds up the consumer.
    pub fn spawn(&self, request: CompletionRequest) -> PageStream {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = self.clone();
        let task = tokio::spawn(async move {
            let report = engine.run(&request, &tx).await;
            drop(tx);
            if let Some(escalator) = &engine.escalator
                && report.outcome.is_reviewable()
            {
                escalator.review(&request, &report.text).await;
            }
            report
        });
        PageStream { rx, task }
    }

    /// Run a session to completion, sending events to `tx`.
    pub async fn run(&self, request: &CompletionRequest, tx: &mpsc::Sender<PageEvent>) -> SessionReport {
        let max_pages = request.max_pages.unwrap_or(self.config.max_pages).max(1);
        let guard = request.guard.as_deref().unwrap_or(&self.config.guard);
        let mut state = SessionState::new(&request.prompt);
        let mut calls = 0u32;

        info!(
            "[{}] Session start: model={}, max_pages={max_pages}",
            request.request_id, request.model
        );

        let outcome = loop {
            let span = page_span_id(&request.request_id, state.page);
            let max_tokens = self.allocator.safe_max_output_tokens(
                &request.model,
                &state.prompt,
                request.desired_cap,
                request.buffer,
            );
            let call = BackendCall {
                model: request.model.clone(),
                system: guard.to_string(),
                prompt: state.prompt.clone(),
                max_tokens,
                stop: self.config.stop_markers.clone(),
                temperature: self.config.temperature,
            };
            debug!("[{span}] Opening backend stream: max_tokens={max_tokens}");

            calls += 1;
            let opened = tokio::select! {
                biased;
                _ = tx.closed() => break SessionOutcome::Done(DoneReason::Cancelled),
                opened = self.backend.open_stream(call) => opened,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("[{span}] Backend call failed: {e}");
                    let _ = tx.send(PageEvent::Error(e.to_string())).await;
                    break SessionOutcome::Aborted(e);
                }
            };

            // Drain the page, forwarding fragments as they arrive.
            let mut page = Page::new(state.page);
            let live = state.accumulated.is_empty();
            let mut sent = 0usize;
            let mut failure = None;
            let mut cancelled = false;
            loop {
                let item = tokio::select! {
                    biased;
                    _ = tx.closed() => {
                        cancelled = true;
                        break;
                    }
                    item = stream.next() => item,
                };
                match item {
                    None => break,
                    Some(Ok(StreamEvent::TextDelta(text))) => {
                        trace!("[{span}] fragment: {} bytes", text.len());
                        page.push_fragment(text.clone());
                        let event = PageEvent::Fragment {
                            page: state.page,
                            text,
                        };
                        if tx.send(event).await.is_err() {
                            cancelled = true;
                            break;
                        }
                        if live && let Delivery::Closed = self.release(&page, &mut sent, tx).await {
                            cancelled = true;
                            break;
                        }
                    }
                    Some(Ok(StreamEvent::Finish(reason))) => page.finish_reason = Some(reason),
                    Some(Ok(StreamEvent::Usage(usage))) => page.usage = Some(usage),
                    Some(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            // Aborts the HTTP request if the body is still open.
            drop(stream);

            if cancelled {
                info!("[{span}] Consumer disconnected, cancelling");
                break SessionOutcome::Done(DoneReason::Cancelled);
            }

            if let Some(e) = failure {
                warn!("[{span}] Backend stream failed: {e}");
                if !page.is_blank() {
                    let content = self.strip_marker(&page.text);
                    if state.dedup.check(&page.text, &content, &state.accumulated).is_none() {
                        let _ = self.commit(&mut state, &page.text, content, sent, tx).await;
                    }
                }
                let _ = tx.send(PageEvent::Error(e.to_string())).await;
                break SessionOutcome::Aborted(e);
            }

            info!(
                "[{span}] Page complete: {} chars, finish_reason={:?}",
                page.text.len(),
                page.finish_reason
            );

            if page.is_blank() {
                info!("[{span}] Empty page, stopping");
                break SessionOutcome::Done(DoneReason::EmptyPage);
            }

            let content = self.strip_marker(&page.text);
            if let Some(kind) = state.dedup.check(&page.text, &content, &state.accumulated) {
                info!("[{span}] Duplicate page ({kind:?}), stopping");
                break SessionOutcome::Done(DoneReason::Duplicate);
            }

            if let Delivery::Closed = self.commit(&mut state, &page.text, content, sent, tx).await {
                break SessionOutcome::Done(DoneReason::Cancelled);
            }

            if !self.wants_continuation(&page) {
                break SessionOutcome::Done(DoneReason::Finished);
            }

            if state.page >= max_pages {
                if self.config.signal_truncation {
                    warn!(
                        "[{}] Page limit ({max_pages}) reached with continuation still requested",
                        request.request_id
                    );
                    let _ = tx.send(PageEvent::Truncated { pages: state.page }).await;
                }
                break SessionOutcome::Done(DoneReason::PageLimit);
            }

            state.prompt =
                continuation_prompt(&request.prompt, &state.accumulated, self.config.anchor_chars);
            state.page += 1;
        };

        info!(
            "[{}] Session end: {outcome:?} after {calls} call(s), {} chars",
            request.request_id,
            state.accumulated.len()
        );

        SessionReport {
            request_id: request.request_id.clone(),
            outcome,
            calls,
            text: state.accumulated,
        }
    }

    fn strip_marker(&self, text: &str) -> String {
        if self.config.marker.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.config.marker, "")
        }
    }

    /// `text` without a trailing run that could still grow into the marker.
    fn settled<'a>(&self, text: &'a str) -> &'a str {
        let marker = &self.config.marker;
        for (end, _) in marker.char_indices().skip(1).collect::<Vec<_>>().into_iter().rev() {
            if let Some(partial) = marker.get(..end)
                && let Some(head) = text.strip_suffix(partial)
            {
                return head;
            }
        }
        text
    }

    /// Commit the settled part of a streaming first page that has not been
    /// sent yet. Nothing goes out until the page has visible content.
    async fn release(&self, page: &Page, sent: &mut usize, tx: &mpsc::Sender<PageEvent>) -> Delivery {
        let content = self.strip_marker(self.settled(&page.text));
        if content.trim().is_empty() {
            return Delivery::Delivered;
        }
        let Some(fresh) = content.get(*sent..).filter(|t| !t.is_empty()) else {
            return Delivery::Delivered;
        };
        let event = PageEvent::Text {
            page: page.number,
            text: fresh.to_string(),
        };
        *sent = content.len();
        match tx.send(event).await {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Closed,
        }
    }

    fn wants_continuation(&self, page: &Page) -> bool {
        let marker = !self.config.marker.is_empty() && page.text.contains(&self.config.marker);
        let length = self.config.continue_on_length && page.finish_reason.as_deref() == Some("length");
        marker || length
    }

    /// Append a page to the accumulated text and emit whatever of it the
    /// first `sent` bytes did not already carry.
    async fn commit(
        &self,
        state: &mut SessionState,
        raw: &str,
        content: String,
        sent: usize,
        tx: &mpsc::Sender<PageEvent>,
    ) -> Delivery {
        state.dedup.record(raw);
        state.accumulated.push_str(&content);
        let rest = content.get(sent..).unwrap_or_default();
        if rest.is_empty() {
            return Delivery::Delivered;
        }
        let event = PageEvent::Text {
            page: state.page,
            text: rest.to_string(),
        };
        match tx.send(event).await {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Closed,
        }
    }
}

/// Prompt for the next page: the original prompt, the continue instruction,
/// and the last `anchor_chars` characters already produced.
pub fn continuation_prompt(initial: &str, accumulated: &str, anchor_chars: usize) -> String {
    let total = accumulated.chars().count();
    let anchor: String = accumulated
        .chars()
        .skip(total.saturating_sub(anchor_chars))
        .collect();
    format!("{initial}\n\n{CONTINUE_INSTRUCTION}\n\n{anchor}")
}
