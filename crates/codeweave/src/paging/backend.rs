//! The seam between the paging engine and whatever produces text.
//!
//! A [`CompletionBackend`] opens exactly one streaming call per page. The
//! engine never retries; a failed call ends the session with an inline error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use futures::stream;
use serde::Deserialize;
use tracing::debug;

use crate::api::streaming::{EventStream, StreamEvent};
use crate::{ChatRequest, Message, OpenRouterClient};

/// Failure of one backend call, either while opening it or mid-stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The request could not be sent (DNS, connect, TLS, ...).
    #[error("request failed: {0}")]
    Request(String),
    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// The backend reported an error inside the event stream.
    #[error("provider error: {0}")]
    Provider(String),
    /// Reading the response body failed after streaming started.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Boxed future returned by [`CompletionBackend::open_stream`].
pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<EventStream, BackendError>> + Send + 'a>>;

/// Everything one backend call needs.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCall {
    pub model: String,
    /// Guard instruction, sent as the system message.
    pub system: String,
    /// Current prompt, sent as the user message.
    pub prompt: String,
    /// Output ceiling from the budget allocator.
    pub max_tokens: u32,
    /// Hard-stop sequences.
    pub stop: Vec<String>,
    pub temperature: f32,
}

/// A text-generation provider that can stream one completion.
///
/// The returned stream yields text deltas, optionally a finish reason and
/// usage, and ends when the call is complete. Dropping it must abort the
/// underlying request.
pub trait CompletionBackend: Send + Sync {
    fn open_stream(&self, call: BackendCall) -> BackendFuture<'_>;
}

impl CompletionBackend for OpenRouterClient {
    fn open_stream(&self, call: BackendCall) -> BackendFuture<'_> {
        Box::pin(async move {
            let body = ChatRequest {
                model: call.model,
                messages: vec![Message::system(call.system), Message::user(call.prompt)],
                max_tokens: call.max_tokens,
                temperature: call.temperature,
                stop: (!call.stop.is_empty()).then_some(call.stop),
                stream: true,
            };
            OpenRouterClient::open_stream(self, &body).await
        })
    }
}

// ── Scripted backend ───────────────────────────────────────────────

/// One canned backend call for [`ScriptedBackend`].
///
/// Deserializes from either a bare string (one fragment, finish reason
/// `"stop"`) or an object with the fields below, so replay files stay terse.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "ScriptedPageRepr")]
pub struct ScriptedPage {
    pub fragments: Vec<String>,
    pub finish_reason: Option<String>,
    /// Fail the call before any text is produced.
    pub open_error: Option<String>,
    /// Fail the stream after the fragments were delivered.
    pub stream_error: Option<String>,
    /// After the fragments, never yield again (simulates a stalled backend).
    pub stall: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptedPageRepr {
    Text(String),
    Full {
        #[serde(default)]
        fragments: Vec<String>,
        #[serde(default)]
        finish_reason: Option<String>,
        #[serde(default)]
        open_error: Option<String>,
        #[serde(default)]
        stream_error: Option<String>,
        #[serde(default)]
        stall: bool,
    },
}

impl From<ScriptedPageRepr> for ScriptedPage {
    fn from(repr: ScriptedPageRepr) -> Self {
        match repr {
            ScriptedPageRepr::Text(text) => Self::text(text),
            ScriptedPageRepr::Full {
                fragments,
                finish_reason,
                open_error,
                stream_error,
                stall,
            } => Self {
                fragments,
                finish_reason,
                open_error,
                stream_error,
                stall,
            },
        }
    }
}

impl ScriptedPage {
    /// A page delivered as a single fragment that finishes with `"stop"`.
    pub fn text(text: impl Into<String>) -> Self {
        Self::fragments([text.into()]).with_finish_reason("stop")
    }

    /// A page delivered as several fragments, with no finish reason.
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// A call that fails before streaming starts.
    pub fn open_error(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    pub fn with_stream_error(mut self, message: impl Into<String>) -> Self {
        self.stream_error = Some(message.into());
        self
    }

    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    fn into_stream(self) -> EventStream {
        let mut items: Vec<Result<StreamEvent, BackendError>> = self
            .fragments
            .into_iter()
            .map(|f| Ok(StreamEvent::TextDelta(f)))
            .collect();
        if let Some(message) = self.stream_error {
            items.push(Err(BackendError::Stream(message)));
        } else if let Some(reason) = self.finish_reason {
            items.push(Ok(StreamEvent::Finish(reason)));
        }

        let items = stream::iter(items);
        if self.stall {
            Box::pin(futures::StreamExt::chain(items, stream::pending()))
        } else {
            Box::pin(items)
        }
    }
}

/// Backend that replays canned pages in order and records every call.
///
/// Used by tests and by the CLI's `--replay` mode. Once the script runs out,
/// further calls produce an empty page.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    pages: Vec<ScriptedPage>,
    calls: Mutex<Vec<BackendCall>>,
}

impl ScriptedBackend {
    pub fn new(pages: Vec<ScriptedPage>) -> Self {
        Self {
            pages,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// One page per string, each finishing with `"stop"`.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(ScriptedPage::text).collect())
    }

    /// Parse a replay script: a JSON array of pages.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let pages: Vec<ScriptedPage> = serde_json::from_str(json)?;
        Ok(Self::new(pages))
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

impl CompletionBackend for ScriptedBackend {
    fn open_stream(&self, call: BackendCall) -> BackendFuture<'_> {
        let index = match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(call);
                calls.len() - 1
            }
            Err(_) => return Box::pin(async { Err(BackendError::Request("script lock poisoned".into())) }),
        };
        let page = self.pages.get(index).cloned().unwrap_or_default();
        debug!("Scripted backend call #{}: {} fragment(s)", index + 1, page.fragments.len());

        Box::pin(async move {
            match page.open_error.clone() {
                Some(message) => Err(BackendError::Request(message)),
                None => Ok(page.into_stream()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn call(prompt: &str) -> BackendCall {
        BackendCall {
            model: "m".into(),
            system: "guard".into(),
            prompt: prompt.into(),
            max_tokens: 256,
            stop: vec![],
            temperature: 0.0,
        }
    }

    async fn drain(backend: &ScriptedBackend, prompt: &str) -> Vec<Result<StreamEvent, BackendError>> {
        match backend.open_stream(call(prompt)).await {
            Ok(stream) => stream.collect().await,
            Err(e) => vec![Err(e)],
        }
    }

    #[tokio::test]
    async fn replays_pages_in_order() {
        let backend = ScriptedBackend::from_texts(["one", "two"]);
        assert_eq!(
            drain(&backend, "a").await,
            vec![
                Ok(StreamEvent::TextDelta("one".into())),
                Ok(StreamEvent::Finish("stop".into())),
            ]
        );
        assert_eq!(drain(&backend, "b").await[0], Ok(StreamEvent::TextDelta("two".into())));
        assert!(drain(&backend, "c").await.is_empty());

        let prompts: Vec<String> = backend.calls().into_iter().map(|c| c.prompt).collect();
        assert_eq!(prompts, vec!["a", "b", "c"]);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn injects_errors() {
        let backend = ScriptedBackend::new(vec![
            ScriptedPage::open_error("connection refused"),
            ScriptedPage::fragments(["par", "tial"]).with_stream_error("reset"),
        ]);
        assert_eq!(
            drain(&backend, "a").await,
            vec![Err(BackendError::Request("connection refused".into()))]
        );
        let events = drain(&backend, "b").await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], Err(BackendError::Stream("reset".into())));
    }

    #[test]
    fn parses_replay_json() {
        let backend = ScriptedBackend::from_json(
            r#"["first [CONTINUE_NEEDED]", {"fragments": ["a", "b"], "finish_reason": "length"}]"#,
        )
        .unwrap();
        assert_eq!(backend.pages[0], ScriptedPage::text("first [CONTINUE_NEEDED]"));
        assert_eq!(
            backend.pages[1],
            ScriptedPage::fragments(["a", "b"]).with_finish_reason("length")
        );
    }

    #[test]
    fn backend_error_display() {
        let err = BackendError::Http {
            status: 429,
            body: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "HTTP 429: rate limited");
    }
}
