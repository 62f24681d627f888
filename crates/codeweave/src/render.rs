//! Tool → template resolution and prompt rendering.
//!
//! The front end names a tool ("terraform", "aws" + mode "quick", ...). The
//! [`TemplateCatalog`] maps that to a template file, and a [`PromptRenderer`]
//! turns the template plus the user's prompt and context into the text the
//! engine sends. The default renderer only substitutes `{{ name }}`
//! placeholders; richer template engines plug in behind the trait.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Tool key used when nothing more specific matches.
pub const FALLBACK_TOOL: &str = "other";

/// Built-in tool → template table.
pub const TEMPLATE_MAP: &[(&str, &str)] = &[
    // Cloud architecture
    ("aws_arch", "solutions_architecture.jinja2"),
    ("azure_arch", "solutions_architecture.jinja2"),
    ("gcp_arch", "solutions_architecture.jinja2"),
    ("others_arch", "solutions_architecture.jinja2"),
    ("aws_quick", "cloud_quick_task.jinja2"),
    ("azure_quick", "cloud_quick_task.jinja2"),
    ("gcp_quick", "cloud_quick_task.jinja2"),
    ("others_quick", "cloud_quick_task.jinja2"),
    // Infrastructure as code
    ("terraform", "terraform_playbook.jinja2"),
    ("aws cloudformation", "cloudformation_playbook.jinja2"),
    ("pulumi", "pulumi_playbook.jinja2"),
    ("ansible", "ansible_playbook.jinja2"),
    ("others (iac / automation)", "other_iac_playbook.jinja2"),
    ("iac_quick_task", "iac_quick_task.jinja2"),
    ("iac_quick_fix", "iac_quick_fix.jinja2"),
    // Kubernetes and containers
    ("kubernetes_troubleshoot", "k8s_troubleshoot.jinja2"),
    ("kubernetes", "k8s_playbook.jinja2"),
    ("docker", "dockerfile_best_practices.jinja2"),
    ("helm", "helm_chart_helper.jinja2"),
    ("istio", "istio_playbook.jinja2"),
    ("openshift", "openshift_playbook.jinja2"),
    ("others (containers)", "other_universal_playbook.jinja2"),
    ("k8s_quick_task", "k8s_quick_task.jinja2"),
    ("k8s_quick_fix", "k8s_quick_fix.jinja2"),
    // Code and scripts
    ("bash", "shell_code_generation.jinja2"),
    ("shell script", "shell_code_generation.jinja2"),
    ("python", "python_code_generation.jinja2"),
    ("go", "go_code_generation.jinja2"),
    ("javascript", "javascript_code_generation.jinja2"),
    ("java", "java_code_generation.jinja2"),
    ("c#", "csharp_code_generation.jinja2"),
    ("rust", "rust_code_generation.jinja2"),
    ("powershell", "powershell_code_generation.jinja2"),
    ("other (script/code)", "other_code_generation.jinja2"),
    // AI and GenAI
    ("genai_arch", "genai_architecture.jinja2"),
    ("genai_quick", "genai_quick_task.jinja2"),
    ("genai pipelines", "genai_architecture.jinja2"),
    ("model fine-tuning", "genai_architecture.jinja2"),
    ("llm deployment", "genai_architecture.jinja2"),
    ("amazon bedrock", "genai_architecture.jinja2"),
    ("vertex ai / sagemaker", "genai_architecture.jinja2"),
    ("others (ai)", "other_universal_playbook.jinja2"),
    ("genai_quick_fix", "genai_quick_fix.jinja2"),
    // Data and MLOps
    ("data_arch", "data_architecture.jinja2"),
    ("mlops_arch", "mlops_architecture.jinja2"),
    ("data engineering", "data_architecture.jinja2"),
    ("mlops", "mlops_architecture.jinja2"),
    ("data lake", "data_architecture.jinja2"),
    ("airflow / dbt", "airflow_dag_or_dbt_model.jinja2"),
    ("others (data)", "other_universal_playbook.jinja2"),
    ("data_quick_task", "data_quick_task.jinja2"),
    ("data_quick_fix", "data_quick_fix.jinja2"),
    // Troubleshooting
    ("troubleshooting", "troubleshooting.jinja2"),
    ("file upload analyzer", "troubleshooting.jinja2"),
    // CI/CD and platform
    ("github actions", "gha_workflow.jinja2"),
    ("gitlab ci/cd", "gitlab_ci_playbook.jinja2"),
    ("azure devops", "azure_devops_pipeline.jinja2"),
    ("argocd", "argocd_appset_helper.jinja2"),
    ("jenkins", "jenkins_playbook.jinja2"),
    ("observability", "observability_runbook.jinja2"),
    ("security & compliance", "security_compliance_playbook.jinja2"),
    ("cost optimization", "cost_quick_wins.jinja2"),
    ("cloud migrations", "migration_playbook.jinja2"),
    ("cicd_quick_task", "cicd_quick_task.jinja2"),
    ("cicd_quick_fix", "cicd_quick_fix.jinja2"),
    // Misc
    ("api gateway templates", "api_gateway_playbook.jinja2"),
    ("other", "other_universal_playbook.jinja2"),
    ("platform audit", "platform_audit.jinja2"),
];

/// Template used when no template file is available on disk.
const BUILTIN_TEMPLATE: &str = "You are assisting with: {{ tool }} ({{ template }}).\n\n\
Task:\n{{ prompt }}\n";

const CONTEXT_SECTION: &str = "\nAdditional context:\n{{ context }}\n";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("failed to read template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A catalog lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    /// The catalog key that matched.
    pub key: String,
    /// Template file name.
    pub template: String,
}

impl ResolvedTemplate {
    /// Task classification derived from the template (file stem).
    pub fn classification(&self) -> String {
        self.template
            .strip_suffix(".jinja2")
            .unwrap_or(&self.template)
            .to_string()
    }
}

/// Immutable tool → template map.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    entries: HashMap<String, String>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateCatalog {
    pub fn builtin() -> Self {
        Self {
            entries: TEMPLATE_MAP
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    /// Add or replace an entry (builder pattern). Keys are lower-cased.
    pub fn with_entry(mut self, key: impl AsRef<str>, template: impl Into<String>) -> Self {
        self.entries
            .insert(key.as_ref().trim().to_lowercase(), template.into());
        self
    }

    /// Resolve a tool and optional mode.
    ///
    /// Tries `"{tool}_{mode}"`, then `tool`, then [`FALLBACK_TOOL`]. Matching
    /// is case-insensitive and ignores surrounding whitespace.
    pub fn resolve(&self, tool: &str, mode: Option<&str>) -> ResolvedTemplate {
        let tool = tool.trim().to_lowercase();
        let mut candidates = Vec::with_capacity(3);
        if let Some(mode) = mode.map(|m| m.trim().to_lowercase())
            && !mode.is_empty()
        {
            candidates.push(format!("{tool}_{mode}"));
        }
        candidates.push(tool);
        candidates.push(FALLBACK_TOOL.to_string());

        for key in candidates {
            if let Some(template) = self.entries.get(&key) {
                return ResolvedTemplate {
                    key,
                    template: template.clone(),
                };
            }
        }
        ResolvedTemplate {
            key: FALLBACK_TOOL.to_string(),
            template: "other_universal_playbook.jinja2".to_string(),
        }
    }
}

/// What a renderer receives.
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub tool: &'a str,
    pub mode: Option<&'a str>,
    pub prompt: &'a str,
    pub context: Option<&'a str>,
}

/// A rendered prompt ready for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub prompt: String,
    pub template: String,
    pub classification: String,
}

/// Turns a tool request into prompt text.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, input: &RenderInput<'_>) -> Result<RenderedPrompt, RenderError>;
}

/// Catalog lookup plus `{{ name }}` substitution.
///
/// With a templates directory, the resolved template file is read from it
/// when present; otherwise a small built-in template is used.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    catalog: TemplateCatalog,
    templates_dir: Option<PathBuf>,
}

impl TemplateRenderer {
    pub fn new(catalog: TemplateCatalog) -> Self {
        Self {
            catalog,
            templates_dir: None,
        }
    }

    pub fn with_templates_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.templates_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    fn load_template(&self, name: &str) -> Result<Option<String>, RenderError> {
        let Some(dir) = &self.templates_dir else {
            return Ok(None);
        };
        let path = dir.join(name);
        if !path.is_file() {
            debug!("Template {} not found, using built-in", path.display());
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|source| RenderError::Template { path, source })
    }
}

impl PromptRenderer for TemplateRenderer {
    fn render(&self, input: &RenderInput<'_>) -> Result<RenderedPrompt, RenderError> {
        if input.prompt.trim().is_empty() {
            return Err(RenderError::EmptyPrompt);
        }
        let resolved = self.catalog.resolve(input.tool, input.mode);
        let context = input.context.map(str::trim).filter(|c| !c.is_empty());

        let template = match self.load_template(&resolved.template)? {
            Some(text) => text,
            None if context.is_some() => format!("{BUILTIN_TEMPLATE}{CONTEXT_SECTION}"),
            None => BUILTIN_TEMPLATE.to_string(),
        };

        let vars = [
            ("tool", input.tool.trim()),
            ("mode", input.mode.unwrap_or_default()),
            ("prompt", input.prompt.trim()),
            ("context", context.unwrap_or_default()),
            ("template", resolved.template.as_str()),
        ];
        let prompt = substitute(&template, &vars);
        debug!(
            "Rendered '{}' via {} ({} chars)",
            resolved.key,
            resolved.template,
            prompt.len()
        );

        Ok(RenderedPrompt {
            prompt,
            classification: resolved.classification(),
            template: resolved.template,
        })
    }
}

/// Replace `{{ name }}` placeholders with values from `vars`.
///
/// Unknown placeholders are left untouched, so templated code inside a
/// prompt (dbt `{{ ref('x') }}`, Helm `{{ .Values.x }}`) survives rendering.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((before, after)) = rest.split_once("{{") {
        out.push_str(before);
        match after.split_once("}}") {
            Some((name, tail)) => {
                match vars.iter().find(|(k, _)| *k == name.trim()) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
                rest = tail;
            }
            None => {
                out.push_str("{{");
                rest = after;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(tool: &'a str, mode: Option<&'a str>, prompt: &'a str) -> RenderInput<'a> {
        RenderInput {
            tool,
            mode,
            prompt,
            context: None,
        }
    }

    #[test]
    fn resolves_tool_and_mode() {
        let catalog = TemplateCatalog::builtin();
        assert_eq!(catalog.resolve("Terraform", None).template, "terraform_playbook.jinja2");
        assert_eq!(catalog.resolve("aws", Some("quick")).key, "aws_quick");
        assert_eq!(catalog.resolve("k8s", Some("quick_fix")).template, "k8s_quick_fix.jinja2");
        // Unknown mode falls back to the tool itself.
        assert_eq!(catalog.resolve("docker", Some("nope")).key, "docker");
    }

    #[test]
    fn unknown_tool_falls_back_to_other() {
        let resolved = TemplateCatalog::builtin().resolve("cobol", None);
        assert_eq!(resolved.key, FALLBACK_TOOL);
        assert_eq!(resolved.classification(), "other_universal_playbook");
    }

    #[test]
    fn custom_entries_override_builtin() {
        let catalog = TemplateCatalog::builtin().with_entry("Terraform", "tf_v2.jinja2");
        assert_eq!(catalog.resolve("terraform", None).template, "tf_v2.jinja2");
    }

    #[test]
    fn substitute_keeps_unknown_placeholders() {
        let out = substitute(
            "Hi {{ name }}, select * from {{ ref('orders') }} {{unclosed",
            &[("name", "Ada")],
        );
        assert_eq!(out, "Hi Ada, select * from {{ ref('orders') }} {{unclosed");
    }

    #[test]
    fn builtin_template_includes_prompt_and_context() {
        let renderer = TemplateRenderer::default();
        let rendered = renderer
            .render(&RenderInput {
                context: Some("eu-west-1"),
                ..input("terraform", None, "  An S3 bucket  ")
            })
            .unwrap();
        assert!(rendered.prompt.contains("Task:\nAn S3 bucket\n"));
        assert!(rendered.prompt.contains("Additional context:\neu-west-1"));
        assert_eq!(rendered.classification, "terraform_playbook");

        let rendered = renderer.render(&input("terraform", None, "x")).unwrap();
        assert!(!rendered.prompt.contains("Additional context"));
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let err = TemplateRenderer::default()
            .render(&input("python", None, " \n"))
            .unwrap_err();
        assert!(matches!(err, RenderError::EmptyPrompt));
    }

    #[test]
    fn template_file_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("python_code_generation.jinja2"),
            "Write Python for: {{ prompt }}\n{{ context }}",
        )
        .unwrap();
        let renderer = TemplateRenderer::default().with_templates_dir(dir.path());
        let rendered = renderer.render(&input("python", None, "a CLI")).unwrap();
        assert_eq!(rendered.prompt, "Write Python for: a CLI\n");

        // Missing files fall back to the built-in template.
        let rendered = renderer.render(&input("go", None, "a CLI")).unwrap();
        assert!(rendered.prompt.starts_with("You are assisting with: go"));
    }
}
