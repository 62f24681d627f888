//! Service configuration.
//!
//! One TOML file, every field optional:
//!
//! ```toml
//! [paging]
//! max_pages = 5
//! anchor_chars = 3000
//! stop_markers = ["## Conclusion"]
//!
//! [tiers.pro]
//! model = "openai/gpt-4o"
//! desired_cap = 4096
//! max_pages = 5
//!
//! [[models]]
//! id = "local/llama"
//! max_context = 8192
//! chars_per_token = 3.2
//!
//! [escalation]
//! log_path = "logs/escalations.jsonl"
//! webhook_url = "https://hooks.slack.com/services/..."
//! ```
//!
//! Loaded once at startup and shared read-only. Secrets may also come from
//! the environment (`OPENROUTER_KEY`, `CODEWEAVE_WEBHOOK_URL`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::paging::PagingConfig;
use crate::policy::TierPolicy;
use crate::profile::{FALLBACK_CONTEXT_TOKENS, ModelProfile, ProfileRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// `[escalation]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// JSONL log of unresolved responses. Unset disables the log.
    pub log_path: Option<PathBuf>,
    /// Slack-compatible webhook. Unset falls back to `CODEWEAVE_WEBHOOK_URL`.
    pub webhook_url: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub paging: PagingConfig,
    pub tiers: TierPolicy,
    /// Profiles added to (or replacing) the built-in table.
    pub models: Vec<ModelProfile>,
    /// Context size assumed for unknown models.
    pub fallback_context: u32,
    pub escalation: EscalationConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            paging: PagingConfig::default(),
            tiers: TierPolicy::default(),
            models: Vec::new(),
            fallback_context: FALLBACK_CONTEXT_TOKENS,
            escalation: EscalationConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(
            "Loaded config from {} ({} model override(s))",
            path.display(),
            config.models.len()
        );
        Ok(config)
    }

    /// Built-in profiles with this config's overrides applied.
    pub fn profile_registry(&self) -> ProfileRegistry {
        ProfileRegistry::builtin()
            .with_profiles(self.models.iter().cloned())
            .with_fallback_context(self.fallback_context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::CONTINUATION_MARKER;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ServiceConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.paging.max_pages, 5);
        assert_eq!(config.paging.anchor_chars, 3_000);
        assert_eq!(config.paging.marker, CONTINUATION_MARKER);
        assert!(config.escalation.log_path.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ServiceConfig::from_toml_str(
            r###"
            fallback_context = 4096

            [paging]
            max_pages = 3
            stop_markers = ["## End"]

            [tiers.pro]
            model = "openai/gpt-4-turbo"
            desired_cap = 6000
            max_pages = 4

            [[models]]
            id = "local/llama"
            max_context = 8192
            chars_per_token = 3.2

            [escalation]
            log_path = "logs/esc.jsonl"
            "###,
        )
        .unwrap();

        assert_eq!(config.paging.max_pages, 3);
        assert_eq!(config.paging.anchor_chars, 3_000);
        assert_eq!(config.paging.stop_markers, vec!["## End".to_string()]);
        assert_eq!(config.tiers.pro.model, "openai/gpt-4-turbo");
        assert_eq!(config.tiers.free, TierPolicy::default().free);
        assert_eq!(config.escalation.log_path, Some(PathBuf::from("logs/esc.jsonl")));

        let registry = config.profile_registry();
        assert_eq!(registry.max_context("local/llama"), 8_192);
        assert_eq!(registry.get("local/llama").unwrap().chars_per_token, Some(3.2));
        assert_eq!(registry.max_context("acme/unknown"), 4_096);
        assert_eq!(registry.max_context("openai/gpt-4o"), 128_000);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let err = ServiceConfig::from_toml_str("[paging]\nmax_pages = \"five\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codeweave.toml");
        std::fs::write(&path, "[paging]\nsignal_truncation = false\n").unwrap();
        let config = ServiceConfig::load(&path).unwrap();
        assert!(!config.paging.signal_truncation);

        let missing = ServiceConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
