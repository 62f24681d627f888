//! Escalation notifications.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use super::{EscalationError, EscalationRecord};

/// Environment variable holding the incoming-webhook URL.
pub const WEBHOOK_URL_ENV: &str = "CODEWEAVE_WEBHOOK_URL";

/// Longest response excerpt included in a notification.
const EXCERPT_CHARS: usize = 500;

/// Boxed future returned by [`Notifier::notify`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EscalationError>> + Send + 'a>>;

/// Delivers an escalation to humans. One attempt, no retries.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, record: &'a EscalationRecord) -> NotifyFuture<'a>;
}

/// Slack-compatible incoming webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, EscalationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EscalationError::Notify(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Notifier for `url` if given, else from [`WEBHOOK_URL_ENV`]. `None` when
    /// neither is set.
    pub fn from_url_or_env(url: Option<&str>) -> Option<Result<Self, EscalationError>> {
        let url = match url {
            Some(url) => url.to_string(),
            None => std::env::var(WEBHOOK_URL_ENV).ok()?,
        };
        if url.trim().is_empty() {
            return None;
        }
        Some(Self::new(url))
    }

    /// Slack message body for a record.
    pub fn format_message(record: &EscalationRecord) -> serde_json::Value {
        let excerpt: String = record.response.chars().take(EXCERPT_CHARS).collect();
        let mut text = format!(
            ":warning: *Unresolved response* `{}`\n*Tool*: {}\n",
            record.request_id, record.tool
        );
        if let Some(class) = &record.classification {
            text.push_str(&format!("*Classification*: {class}\n"));
        }
        text.push_str(&format!("*Prompt*: {}\n```{excerpt}```", record.prompt));
        serde_json::json!({ "text": text })
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(&'a self, record: &'a EscalationRecord) -> NotifyFuture<'a> {
        Box::pin(async move {
            debug!("[{}] Sending escalation webhook", record.request_id);
            let response = self
                .client
                .post(&self.url)
                .json(&Self::format_message(record))
                .send()
                .await
                .map_err(|e| EscalationError::Notify(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(EscalationError::Notify(format!("webhook returned HTTP {status}: {body}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EscalationRecord {
        EscalationRecord {
            timestamp: "2026-01-01T00:00:00+00:00".into(),
            request_id: "cw-1".into(),
            tool: "regex".into(),
            prompt: "match emails".into(),
            context: None,
            rendered_prompt: "Write a regex that matches emails".into(),
            classification: Some("text-processing".into()),
            response: "x".repeat(2_000),
        }
    }

    #[test]
    fn message_has_slack_text_field() {
        let msg = WebhookNotifier::format_message(&record());
        let text = msg["text"].as_str().unwrap();
        assert!(text.contains("cw-1"));
        assert!(text.contains("*Tool*: regex"));
        assert!(text.contains("text-processing"));
        assert!(text.len() < 700);
    }

    #[test]
    fn explicit_url_wins() {
        let notifier = WebhookNotifier::from_url_or_env(Some("http://127.0.0.1:9/hook"));
        assert_eq!(notifier.unwrap().unwrap().url, "http://127.0.0.1:9/hook");
        assert!(WebhookNotifier::from_url_or_env(Some("  ")).is_none());
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error() {
        // Port 9 (discard) is not listening on loopback.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook").unwrap();
        let result = notifier.notify(&record()).await;
        assert!(matches!(result, Err(EscalationError::Notify(_))));
    }
}
