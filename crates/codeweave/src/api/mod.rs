//! Wire-level support for talking to the completion backend.
//!
//! - [`streaming`] — incremental SSE decoder for chat completion streams and
//!   the [`OpenRouterClient::open_stream`](crate::OpenRouterClient::open_stream)
//!   call that feeds it. Produces [`StreamEvent`](streaming::StreamEvent) values.
//! - [`tracing`] — request correlation ids (`request_id` / per-page span ids)
//!   stamped on log lines and escalation records.

pub mod streaming;
pub mod tracing;

pub use streaming::{EventStream, SseDecoder, StreamEvent};
pub use self::tracing::{generate_request_id, page_span_id};
