//! `codeweave` generate endpoint server.
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run -p codeweave-web
//! OPENROUTER_KEY=sk-... cargo run -p codeweave-web -- --port 8080 --config codeweave.toml
//! cargo run -p codeweave-web -- --replay pages.json
//! ```
//!
//! ## Generating
//!
//! ```bash
//! curl -N localhost:3001/api/generate \
//!   -H 'content-type: application/json' \
//!   -d '{"tool": "terraform", "prompt": "An S3 bucket with versioning", "plan": "pro"}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use codeweave::OpenRouterClient;
use codeweave::config::ServiceConfig;
use codeweave::paging::{CompletionBackend, ScriptedBackend};
use codeweave::service::GenerateService;
use codeweave_web::{WebConfig, spawn_web};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Streaming code generation server.
#[derive(Parser)]
#[command(about = "HTTP server streaming paged completions")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Listen on all interfaces instead of loopback only.
    #[arg(long)]
    public: bool,

    /// TOML service config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory with template files.
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Built frontend to serve for non-API paths.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Chat completions endpoint (OpenAI-compatible, SSE streaming).
    #[arg(long)]
    endpoint: Option<String>,

    /// Replay backend pages from a JSON file instead of calling the API.
    #[arg(long)]
    replay: Option<PathBuf>,
}

fn build_backend(args: &Args) -> Result<Arc<dyn CompletionBackend>, String> {
    if let Some(path) = &args.replay {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read replay file '{}': {e}", path.display()))?;
        let backend = ScriptedBackend::from_json(&json).map_err(|e| e.to_string())?;
        return Ok(Arc::new(backend));
    }

    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let mut client = OpenRouterClient::new(api_key)?;
    if let Some(endpoint) = &args.endpoint {
        client = client.with_endpoint(endpoint);
    }
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // 1. Configuration and backend.
    let config = match &args.config {
        Some(path) => ServiceConfig::load(path).map_err(|e| e.to_string())?,
        None => ServiceConfig::default(),
    };
    let backend = build_backend(&args)?;

    // 2. The generate service shared by every request.
    let service = GenerateService::from_config(&config, backend, args.templates.as_deref())
        .map_err(|e| e.to_string())?;

    // 3. Serve.
    let host = if args.public { [0, 0, 0, 0] } else { [127, 0, 0, 1] };
    let web_config = WebConfig {
        bind_addr: (host, args.port).into(),
        static_dir: args.static_dir.clone(),
    };
    let addr = spawn_web(Arc::new(service), web_config)
        .await
        .map_err(|e| format!("failed to bind: {e}"))?;
    println!("Generate endpoint: http://{addr}/api/generate");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {e}"))?;
    info!("Shutting down");
    Ok(())
}
