//! The inbound `generate` operation: render, pick a tier, run the engine.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::ServiceConfig;
use crate::context::BudgetAllocator;
use crate::escalation::{EscalationError, EscalationLog, Escalator, WebhookNotifier};
use crate::paging::{CompletionBackend, CompletionRequest, PageStream, PagedCompletionEngine, RequestOrigin};
use crate::policy::{PlanTier, TierPolicy};
use crate::render::{PromptRenderer, RenderError, RenderInput, TemplateCatalog, TemplateRenderer};

/// A generate call as the front end sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub tool: String,
    pub prompt: String,
    pub context: Option<String>,
    pub plan: PlanTier,
    pub mode: Option<String>,
}

impl GenerateRequest {
    pub fn new(tool: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            prompt: prompt.into(),
            context: None,
            plan: PlanTier::default(),
            mode: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_plan(mut self, plan: PlanTier) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

/// Renderer, tier policy and engine behind one call.
#[derive(Clone)]
pub struct GenerateService {
    renderer: Arc<dyn PromptRenderer>,
    policy: TierPolicy,
    engine: PagedCompletionEngine,
}

impl GenerateService {
    pub fn new(renderer: Arc<dyn PromptRenderer>, policy: TierPolicy, engine: PagedCompletionEngine) -> Self {
        Self {
            renderer,
            policy,
            engine,
        }
    }

    /// Wire everything from a [`ServiceConfig`].
    ///
    /// Fails only if the webhook HTTP client cannot be built.
    pub fn from_config(
        config: &ServiceConfig,
        backend: Arc<dyn CompletionBackend>,
        templates_dir: Option<&Path>,
    ) -> Result<Self, EscalationError> {
        let allocator = BudgetAllocator::new(Arc::new(config.profile_registry()));
        let mut engine = PagedCompletionEngine::new(backend, Arc::new(allocator), config.paging.clone());

        let notifier = WebhookNotifier::from_url_or_env(config.escalation.webhook_url.as_deref()).transpose()?;
        if config.escalation.log_path.is_some() || notifier.is_some() {
            let mut escalator = Escalator::new();
            if let Some(path) = &config.escalation.log_path {
                escalator = escalator.with_log(EscalationLog::new(path));
            }
            if let Some(notifier) = notifier {
                escalator = escalator.with_notifier(Arc::new(notifier));
            }
            engine = engine.with_escalator(Arc::new(escalator));
        }

        let mut renderer = TemplateRenderer::new(TemplateCatalog::builtin());
        if let Some(dir) = templates_dir {
            renderer = renderer.with_templates_dir(dir);
        }

        Ok(Self::new(Arc::new(renderer), config.tiers.clone(), engine))
    }

    pub fn engine(&self) -> &PagedCompletionEngine {
        &self.engine
    }

    /// Render the request and start a paged session.
    ///
    /// Render failures (e.g. an empty prompt) are returned before anything is
    /// streamed; everything after that arrives as events.
    pub fn generate(&self, request: GenerateRequest) -> Result<PageStream, RenderError> {
        let rendered = self.renderer.render(&RenderInput {
            tool: &request.tool,
            mode: request.mode.as_deref(),
            prompt: &request.prompt,
            context: request.context.as_deref(),
        })?;
        let tier = self.policy.select(request.plan);

        let completion = CompletionRequest::new(&tier.model, rendered.prompt, tier.desired_cap)
            .with_max_pages(tier.max_pages)
            .with_origin(RequestOrigin {
                tool: request.tool,
                prompt: request.prompt,
                context: request.context,
                classification: Some(rendered.classification),
            });
        info!(
            "[{}] generate: template={}, plan={}, model={}",
            completion.request_id, rendered.template, request.plan, tier.model
        );
        Ok(self.engine.spawn(completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::{DoneReason, PageEvent, ScriptedBackend, SessionOutcome};

    fn service(backend: Arc<ScriptedBackend>, config: &ServiceConfig) -> GenerateService {
        GenerateService::from_config(config, backend, None).unwrap()
    }

    #[tokio::test]
    async fn generate_streams_rendered_prompt_through_tier_model() {
        let backend = Arc::new(ScriptedBackend::from_texts(["resource \"aws_s3_bucket\" \"b\" {}"]));
        let svc = service(backend.clone(), &ServiceConfig::default());

        let stream = svc
            .generate(
                GenerateRequest::new("terraform", "An S3 bucket")
                    .with_plan(PlanTier::Pro)
                    .with_context("versioning on"),
            )
            .unwrap();
        let (events, report) = stream.collect_all().await;

        assert_eq!(report.unwrap().outcome, SessionOutcome::Done(DoneReason::Finished));
        assert!(events.iter().any(|e| matches!(e, PageEvent::Text { .. })));

        let call = &backend.calls()[0];
        assert_eq!(call.model, TierPolicy::default().pro.model);
        assert!(call.prompt.contains("An S3 bucket"));
        assert!(call.prompt.contains("versioning on"));
        assert!(call.max_tokens <= TierPolicy::default().pro.desired_cap);
    }

    #[tokio::test]
    async fn tier_page_limit_applies() {
        let backend = Arc::new(ScriptedBackend::from_texts([
            "a [CONTINUE_NEEDED]",
            "b [CONTINUE_NEEDED]",
            "c [CONTINUE_NEEDED]",
            "d [CONTINUE_NEEDED]",
        ]));
        let mut config = ServiceConfig::default();
        config.tiers.free.max_pages = 2;
        let (_, report) = service(backend.clone(), &config)
            .generate(GenerateRequest::new("bash", "backup script"))
            .unwrap()
            .collect_all()
            .await;
        assert_eq!(report.unwrap().outcome, SessionOutcome::Done(DoneReason::PageLimit));
        assert_eq!(backend.call_count(), 2);
    }

    #[test]
    fn empty_prompt_fails_before_streaming() {
        let backend = Arc::new(ScriptedBackend::default());
        let svc = service(backend.clone(), &ServiceConfig::default());
        let result = svc.generate(GenerateRequest::new("python", "   "));
        assert!(matches!(result, Err(RenderError::EmptyPrompt)));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn unresolved_answer_is_escalated_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("esc.jsonl");
        let mut config = ServiceConfig::default();
        config.escalation.log_path = Some(log_path.clone());
        // An explicit empty URL keeps the environment's webhook out of the test.
        config.escalation.webhook_url = Some(String::new());

        let backend = Arc::new(ScriptedBackend::from_texts(["I'm not sure which region you mean."]));
        let (_, report) = service(backend, &config)
            .generate(GenerateRequest::new("aws", "a VPC").with_mode("quick"))
            .unwrap()
            .collect_all()
            .await;
        assert!(report.is_some());

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"tool\":\"aws\""));
        assert!(content.contains("cloud_quick_task"));
        let record: crate::escalation::EscalationRecord = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(record.prompt, "a VPC");
        assert_ne!(record.rendered_prompt, record.prompt);
        assert!(record.rendered_prompt.contains("a VPC"));
    }
}
