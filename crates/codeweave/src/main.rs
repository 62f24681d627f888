//! Render a tool prompt and stream a paged completion to stdout.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Logs go
//! to stderr; set `RUST_LOG` to change the level (default `info`).
//!
//! # Examples
//!
//! ```sh
//! # Basic request on the free tier
//! codeweave --tool terraform --prompt "An S3 bucket with versioning"
//!
//! # Tool + mode, extra context, pro tier
//! codeweave --tool aws --mode quick --plan pro \
//!   --prompt "Rotate IAM access keys" --context "Org with 40 accounts"
//!
//! # Pipe the prompt from stdin, with a config file
//! cat task.md | codeweave --tool python --stdin --config codeweave.toml
//!
//! # Replay canned backend pages instead of calling the API
//! codeweave --tool bash --prompt "backup script" --replay pages.json
//! ```

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use codeweave::config::ServiceConfig;
use codeweave::paging::{CompletionBackend, ScriptedBackend, SessionOutcome};
use codeweave::policy::PlanTier;
use codeweave::service::{GenerateRequest, GenerateService};
use codeweave::OpenRouterClient;
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Render a tool prompt and stream a paged completion to stdout.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "codeweave", version)]
struct Cli {
    // ── Request ────────────────────────────────────────────────
    /// Tool identifier (e.g. "terraform", "python", "aws")
    #[arg(long)]
    tool: String,

    /// Task description
    #[arg(long)]
    prompt: Option<String>,

    /// Read the task description from stdin
    #[arg(long)]
    stdin: bool,

    /// Extra context appended to the prompt
    #[arg(long)]
    context: Option<String>,

    /// Tool mode (e.g. "quick", "quick_fix", "arch")
    #[arg(long)]
    mode: Option<String>,

    /// Plan tier: free, pro or teams
    #[arg(long, default_value = "free")]
    plan: String,

    // ── Configuration ──────────────────────────────────────────
    /// TOML service config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory with template files
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Override the page limit for every tier
    #[arg(long)]
    max_pages: Option<u32>,

    // ── Backend ────────────────────────────────────────────────
    /// Chat completions endpoint (OpenAI-compatible, SSE streaming)
    #[arg(long)]
    endpoint: Option<String>,

    /// Replay backend pages from a JSON file instead of calling the API
    #[arg(long)]
    replay: Option<PathBuf>,
}

fn read_prompt(cli: &Cli) -> Result<String, String> {
    let stdin_text = if cli.stdin {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        Some(buf)
    } else {
        None
    };

    match (&cli.prompt, stdin_text) {
        (Some(prompt), Some(stdin)) => Ok(format!("{prompt}\n\n{stdin}")),
        (Some(prompt), None) => Ok(prompt.clone()),
        (None, Some(stdin)) => Ok(stdin),
        (None, None) => Err("provide --prompt, --stdin, or both".to_string()),
    }
}

fn load_config(cli: &Cli) -> Result<ServiceConfig, String> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path).map_err(|e| e.to_string())?,
        None => ServiceConfig::default(),
    };
    if let Some(pages) = cli.max_pages {
        config.paging.max_pages = pages;
        config.tiers.free.max_pages = pages;
        config.tiers.pro.max_pages = pages;
        config.tiers.teams.max_pages = pages;
    }
    Ok(config)
}

fn build_backend(cli: &Cli) -> Result<Arc<dyn CompletionBackend>, String> {
    if let Some(path) = &cli.replay {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read replay file '{}': {e}", path.display()))?;
        let backend = ScriptedBackend::from_json(&json)
            .map_err(|e| format!("invalid replay file '{}': {e}", path.display()))?;
        info!("Replaying backend pages from {}", path.display());
        return Ok(Arc::new(backend));
    }

    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "OPENROUTER_KEY environment variable not set".to_string())?;
    let mut client = OpenRouterClient::new(api_key)?;
    if let Some(endpoint) = &cli.endpoint {
        client = client.with_endpoint(endpoint);
    }
    Ok(Arc::new(client))
}

async fn run(cli: &Cli) -> Result<(), String> {
    let prompt = read_prompt(cli)?;
    let config = load_config(cli)?;
    let backend = build_backend(cli)?;
    let service = GenerateService::from_config(&config, backend, cli.templates.as_deref())
        .map_err(|e| e.to_string())?;

    let plan: PlanTier = cli.plan.parse().unwrap_or_default();
    let mut request = GenerateRequest::new(&cli.tool, prompt).with_plan(plan);
    if let Some(context) = &cli.context {
        request = request.with_context(context);
    }
    if let Some(mode) = &cli.mode {
        request = request.with_mode(mode);
    }

    let mut events = service.generate(request).map_err(|e| e.to_string())?;
    let mut stdout = io::stdout();
    while let Some(event) = events.next().await {
        if let Some(chunk) = event.body_chunk() {
            print!("{chunk}");
            let _ = stdout.flush();
        }
    }
    println!();

    match events.into_report().await.map(|r| r.outcome) {
        Some(SessionOutcome::Aborted(e)) => Err(format!("generation aborted: {e}")),
        Some(SessionOutcome::Done(reason)) => {
            info!("Done: {reason:?}");
            Ok(())
        }
        None => Err("generation task failed".to_string()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
