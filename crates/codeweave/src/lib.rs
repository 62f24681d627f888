//! Paged streaming completion orchestrator for prompt-templated code generation.
//!
//! `codeweave` sits between a "pick a tool, describe the task" front end and a
//! hosted chat completions API ([OpenRouter](https://openrouter.ai/) or any
//! compatible endpoint). Rendering a prompt is easy; the interesting part is
//! getting a long answer out of a backend whose single-call output budget is
//! smaller than the answer. The [`PagedCompletionEngine`](paging::PagedCompletionEngine)
//! does that: it sizes every call against the model's context window, streams
//! text as it arrives, and when the model says it ran out of room it continues
//! the generation in a fresh call, without repeating itself and without
//! looping forever.
//!
//! # Getting started
//!
//! ```ignore
//! use codeweave::prelude::*;
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let api_key = std::env::var("OPENROUTER_KEY").unwrap();
//!     let client = Arc::new(OpenRouterClient::new(api_key)?);
//!
//!     let config = ServiceConfig::default();
//!     let service = GenerateService::from_config(&config, client, None)
//!         .map_err(|e| e.to_string())?;
//!
//!     let mut events = service
//!         .generate(GenerateRequest::new("terraform", "An S3 bucket with versioning"))
//!         .map_err(|e| e.to_string())?;
//!
//!     while let Some(event) = events.next().await {
//!         if let Some(chunk) = event.body_chunk() {
//!             print!("{chunk}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Context window sizes:** [`ProfileRegistry`](profile::ProfileRegistry).
//! - **Token estimation and per-call budgets:** [`context::estimator`] and
//!   [`context::budget`].
//! - **The continuation loop:** [`paging::engine`], its duplicate detection in
//!   [`paging::dedup`], and the backend seam in [`paging::backend`].
//! - **"The model gave up" alerts:** [`escalation`].
//! - **Tool → template rendering and plan tiers:** [`render`] and [`policy`].
//! - **One call that does all of it:** [`service::GenerateService`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | SSE decoding for streamed chat completions, request ids |
//! | [`config`] | TOML service configuration with defaults for every field |
//! | [`context`] | Token estimator and output budget allocator |
//! | [`escalation`] | Hedging detection, JSONL escalation log, webhook notifier |
//! | [`paging`] | Paged completion engine, dedup guard, backend trait |
//! | [`policy`] | Plan tier → model, output cap, page limit |
//! | [`profile`] | Model profile registry |
//! | [`render`] | Template catalog and variable substitution |
//! | [`service`] | End-to-end `generate` operation |

pub mod api;
pub mod config;
pub mod context;
pub mod escalation;
pub mod paging;
pub mod policy;
pub mod prelude;
pub mod profile;
pub mod render;
pub mod service;

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Model used when neither the tier policy nor the caller names one.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Only the fields the paging engine needs;
/// unset optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Token usage statistics reported in the final stream chunk.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenRouter-compatible chat completions API.
///
/// The client only knows how to open a streaming call; see
/// [`paging::backend`] for the [`CompletionBackend`](paging::CompletionBackend)
/// implementation the engine drives.
pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) endpoint: String,
    pub(crate) referer: String,
    pub(crate) title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, "https://github.com/codeweave", "codeweave")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        // Streams are read chunk by chunk, so the timeout bounds a stalled
        // connection rather than the whole (possibly long) generation.
        let client = reqwest::Client::builder()
            .user_agent(concat!("codeweave/", env!("CARGO_PKG_VERSION")))
            .read_timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: OPENROUTER_URL.to_string(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Point the client at a different chat completions endpoint (any
    /// OpenAI-compatible server that speaks SSE streaming).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The chat completions URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content, "hello");

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);
        assert_eq!(user.role.to_string(), "user");
        assert_eq!(serde_json::to_value(&user.role).unwrap(), "user");
        assert!(serde_json::from_str::<MessageRole>("\"assistant\"").is_err());
    }

    #[test]
    fn chat_request_skips_unset_fields() {
        let req = ChatRequest {
            model: "test-model".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
        assert!(json.get("stop").is_none());
        assert!(json.get("stream").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn chat_request_serializes_stream_fields() {
        let req = ChatRequest {
            model: "test-model".into(),
            messages: vec![Message::system("guard"), Message::user("hi")],
            max_tokens: 512,
            temperature: 0.2,
            stop: Some(vec!["## Conclusion".into()]),
            stream: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["max_tokens"], 512);
        assert_eq!(json["stream"], true);
        assert_eq!(json["stop"][0], "## Conclusion");
    }

    #[test]
    fn client_endpoint_override() {
        let client = OpenRouterClient::new("key")
            .unwrap()
            .with_endpoint("http://localhost:8080/v1/chat/completions");
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
