//! HTTP endpoint handlers.
//!
//! `POST /api/generate` answers with `200 text/plain` as soon as the prompt
//! renders, then streams committed page text. Anything that goes wrong after
//! that point arrives inline in the body (`[error] ...`), since the status
//! line is already on the wire.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use codeweave::policy::PlanTier;
use codeweave::service::{GenerateRequest, GenerateService};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GenerateService>,
}

/// Request body for POST /api/generate.
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub tool: String,
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
    /// `free`, `pro` or `teams`. Anything else is treated as `free`.
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl GenerateBody {
    fn into_request(self) -> GenerateRequest {
        let plan = self
            .plan
            .as_deref()
            .and_then(|p| p.parse::<PlanTier>().ok())
            .unwrap_or_default();
        let mut request = GenerateRequest::new(self.tool, self.prompt).with_plan(plan);
        request.context = self.context.filter(|c| !c.trim().is_empty());
        request.mode = self.mode.filter(|m| !m.trim().is_empty());
        request
    }
}

/// POST /api/generate — Stream a paged completion.
///
/// Returns 400 if the prompt cannot be rendered (e.g. it is empty).
/// Closing the connection cancels the session.
pub async fn post_generate(State(app): State<AppState>, Json(body): Json<GenerateBody>) -> Response {
    debug!("generate: tool={}, plan={:?}", body.tool, body.plan);
    let events = match app.service.generate(body.into_request()) {
        Ok(events) => events,
        Err(e) => {
            warn!("Rejected generate request: {e}");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let chunks = events.filter_map(|event| async move { event.body_chunk().map(Ok::<_, Infallible>) });
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(chunks),
    )
        .into_response()
}

/// GET /api/health — Liveness probe.
pub async fn get_health() -> &'static str {
    "ok"
}
