//! Server-Sent Events (SSE) streaming for chat completions.
//!
//! [`OpenRouterClient::open_stream`] sends a request with `"stream": true` and
//! returns an [`EventStream`] that yields [`StreamEvent`]s as chunks come off
//! the wire. Decoding lives in [`SseDecoder`], which is fed raw bytes and is
//! independent of the HTTP client so it can be exercised directly.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::Stream;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::paging::BackendError;
use crate::{ChatRequest, OpenRouterClient, UsageInfo};

/// A single decoded event from an SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// Token usage information (usually in the final chunk).
    Usage(UsageInfo),
    /// The backend reported why it stopped (`"stop"`, `"length"`, ...).
    Finish(String),
}

/// Stream of decoded events for one backend call.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, BackendError>> + Send>>;

/// Raw SSE data chunk from the API.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageInfo>,
    error: Option<StreamError>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamError {
    message: String,
}

/// Incremental decoder turning SSE bytes into [`StreamEvent`]s.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `data: [DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk of bytes, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, BackendError>> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&line);
            if self.decode_line(line.trim(), &mut events) {
                self.done = true;
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Flush whatever is left in the buffer once the body has ended.
    pub fn finish(&mut self) -> Vec<Result<StreamEvent, BackendError>> {
        let mut events = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest);
            self.decode_line(rest.trim(), &mut events);
        }
        self.done = true;
        events
    }

    /// Decode one line. Returns `true` on the `[DONE]` sentinel.
    fn decode_line(&self, line: &str, events: &mut Vec<Result<StreamEvent, BackendError>>) -> bool {
        if line.is_empty() || line.starts_with(':') {
            return false;
        }
        if line == "data: [DONE]" {
            return true;
        }
        if let Some(data) = line.strip_prefix("data:") {
            parse_sse_data(data.trim_start(), events);
        }
        false
    }
}

/// Parse a single SSE `data:` payload into stream events.
fn parse_sse_data(data: &str, events: &mut Vec<Result<StreamEvent, BackendError>>) {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            // Providers report failures that happen after the headers were
            // sent as an error object inside the stream.
            if let Some(err) = chunk.error {
                events.push(Err(BackendError::Provider(err.message)));
                return;
            }

            if let Some(choices) = chunk.choices {
                for choice in choices {
                    if let Some(content) = choice.delta.and_then(|d| d.content)
                        && !content.is_empty()
                    {
                        events.push(Ok(StreamEvent::TextDelta(content)));
                    }
                    if let Some(reason) = choice.finish_reason {
                        trace!("Stream finish_reason: {reason}");
                        events.push(Ok(StreamEvent::Finish(reason)));
                    }
                }
            }

            if let Some(usage) = chunk.usage {
                events.push(Ok(StreamEvent::Usage(usage)));
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} - data: {data}");
        }
    }
}

/// Per-call state threaded through [`futures::stream::unfold`].
struct SseState {
    resp: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, BackendError>>,
    finished: bool,
}

impl OpenRouterClient {
    /// Send a chat completion request with SSE streaming enabled.
    ///
    /// Resolves once the response headers arrive. Non-2xx statuses are
    /// reported here; failures after that point surface as `Err` items in
    /// the returned stream. Dropping the stream drops the response, which
    /// aborts the in-flight HTTP request.
    pub async fn open_stream(&self, body: &ChatRequest) -> Result<EventStream, BackendError> {
        debug!(
            "LLM stream request: model={}, messages={}, max_tokens={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let state = SseState {
            resp,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.finished {
                    return None;
                }
                match st.resp.chunk().await {
                    Ok(Some(bytes)) => {
                        st.pending.extend(st.decoder.push(&bytes));
                        if st.decoder.is_done() {
                            st.finished = true;
                        }
                    }
                    Ok(None) => {
                        st.pending.extend(st.decoder.finish());
                        st.finished = true;
                    }
                    Err(e) => {
                        st.pending
                            .push_back(Err(BackendError::Stream(e.to_string())));
                        st.finished = true;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
