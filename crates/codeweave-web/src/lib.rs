//! HTTP front end for `codeweave`.
//!
//! `codeweave-web` exposes a [`GenerateService`] over axum:
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /api/generate` | `{tool, prompt, context?, plan?, mode?}` → streamed `text/plain` |
//! | `GET /api/health` | `ok` |
//!
//! # Quick start
//!
//! ```ignore
//! use codeweave::prelude::*;
//! use codeweave_web::{WebConfig, spawn_web};
//! use std::sync::Arc;
//!
//! let client = Arc::new(OpenRouterClient::new(api_key)?);
//! let service = GenerateService::from_config(&ServiceConfig::default(), client, None)?;
//! let addr = spawn_web(Arc::new(service), WebConfig::default()).await?;
//! println!("Listening on http://{addr}");
//! ```
//!
//! # Streaming contract
//!
//! ```text
//! client ──POST──▶ render ──(400 on failure)
//!                    │
//!                    ▼
//!             200 text/plain ◀── Text events ◀── PagedCompletionEngine
//!                            ◀── "[truncated: ...]" / "[error] ..."
//! ```
//!
//! Dropping the connection drops the event stream, which cancels the
//! session and aborts any in-flight backend call.

mod api;
mod server;

pub use server::build_router;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use codeweave::service::GenerateService;

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
    /// Directory with the built frontend, served for non-API paths.
    ///
    /// If `None`, only the API is served.
    pub static_dir: Option<PathBuf>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            static_dir: None,
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// The server runs until the Tokio runtime shuts down.
pub async fn spawn_web(service: Arc<GenerateService>, config: WebConfig) -> std::io::Result<SocketAddr> {
    let router = server::build_router(service, config.static_dir);
    server::start_server(router, config.bind_addr).await
}
