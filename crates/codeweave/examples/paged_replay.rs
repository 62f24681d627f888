//! Paged completion without an API key.
//!
//! Drives the engine against a scripted backend that runs out of room twice,
//! printing every event so the continuation loop is visible.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example paged_replay
//! ```

use std::sync::Arc;

use codeweave::prelude::*;
use futures::StreamExt;

#[tokio::main]
async fn main() -> Result<(), String> {
    // 1. A backend that needs three pages to finish.
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedPage::fragments(["#!/usr/bin/env bash\n", "set -euo pipefail\n", "[CONTINUE_NEEDED]"]),
        ScriptedPage::fragments(["tar czf backup.tgz \"$SRC\"\n", "[CONTINUE_NEEDED]"]),
        ScriptedPage::text("aws s3 cp backup.tgz \"s3://$BUCKET/\"\n"),
    ]));

    // 2. Budget against the built-in model table.
    let allocator = BudgetAllocator::new(Arc::new(ProfileRegistry::builtin()));

    // 3. Run one session and watch the events.
    let engine = PagedCompletionEngine::new(backend.clone(), Arc::new(allocator), PagingConfig::default());
    let mut events = engine.spawn(CompletionRequest::new(DEFAULT_MODEL, "A nightly backup script", 2_048));
    while let Some(event) = events.next().await {
        println!("{event:?}");
    }

    let report = events.into_report().await.ok_or("session task failed")?;
    println!("--- {:?} | {} calls ---\n{}", report.outcome, report.calls, report.text);
    Ok(())
}
