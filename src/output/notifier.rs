//! End-of-run notification
//!
//! A [`Notifier`] is called once when a run finishes, with the final metrics
//! and, for an aborted run, the abort reason. Delivery failures are the
//! caller's to log; they never change the run's outcome.

use crate::config::{NotifierConfig, WebhookFormat};
use crate::output::RunMetrics;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const FOOTER: &str = "Sumi-Harvest";
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur while delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Receives the final metrics of a run
#[async_trait]
pub trait Notifier: Send + Sync {
    /// # Arguments
    ///
    /// * `metrics` - Final metrics of the run
    /// * `error` - Why the run was aborted, if it was
    async fn notify(&self, metrics: &RunMetrics, error: Option<&str>) -> Result<(), NotifyError>;
}

/// Writes the run summary to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, metrics: &RunMetrics, error: Option<&str>) -> Result<(), NotifyError> {
        match error {
            Some(message) => tracing::error!(
                "Run aborted: {} ({} of {} targets succeeded)",
                message,
                metrics.success,
                metrics.total
            ),
            None => tracing::info!(
                "Run finished: {} succeeded, {} failed, {} skipped ({:.1}% success)",
                metrics.success,
                metrics.failed,
                metrics.skipped,
                metrics.success_rate() * 100.0
            ),
        }
        Ok(())
    }
}

/// Colour band for a run's success rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColour {
    /// 90% and above
    Good,
    /// 70% up to 90%
    Warning,
    Danger,
}

impl StatusColour {
    /// # Arguments
    ///
    /// * `success_percent` - Success rate in percent (0-100)
    pub fn for_rate(success_percent: f64) -> Self {
        if success_percent >= 90.0 {
            Self::Good
        } else if success_percent >= 70.0 {
            Self::Warning
        } else {
            Self::Danger
        }
    }

    /// Slack attachment colour name
    pub fn slack(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }

    /// Discord embed colour
    pub fn discord(&self) -> u32 {
        match self {
            Self::Good => 0x36a64f,
            Self::Warning => 0xff9900,
            Self::Danger => 0xff0000,
        }
    }
}

/// Posts the run summary to a Slack or Discord webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    format: WebhookFormat,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: impl Into<String>, format: WebhookFormat) -> Self {
        Self {
            client,
            url: url.into(),
            format,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, metrics: &RunMetrics, error: Option<&str>) -> Result<(), NotifyError> {
        let payload = build_payload(self.format, metrics, error);

        let response = self
            .client
            .post(&self.url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Webhook notification delivered ({})", status);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn stat_fields(metrics: &RunMetrics) -> Vec<(&'static str, String)> {
    let duration = metrics
        .duration()
        .map_or_else(|| "-".to_string(), |d| format!("{:.1}s", d.as_secs_f64()));

    vec![
        ("Total", metrics.total.to_string()),
        ("Succeeded", metrics.success.to_string()),
        ("Failed", metrics.failed.to_string()),
        ("Skipped", metrics.skipped.to_string()),
        ("Success rate", format!("{:.1}%", metrics.success_rate() * 100.0)),
        ("Duration", duration),
    ]
}

/// Builds the JSON body for a webhook in the given dialect
pub fn build_payload(format: WebhookFormat, metrics: &RunMetrics, error: Option<&str>) -> Value {
    let percent = metrics.success_rate() * 100.0;
    let colour = match error {
        Some(_) => StatusColour::Danger,
        None => StatusColour::for_rate(percent),
    };
    let headline = match error {
        Some(message) => format!("Collection aborted: {}", message),
        None => format!("Collection finished - {:.1}% success", percent),
    };
    let fields = stat_fields(metrics);

    match format {
        WebhookFormat::Slack => json!({
            "text": headline,
            "attachments": [{
                "color": colour.slack(),
                "fields": fields
                    .iter()
                    .map(|(title, value)| json!({"title": title, "value": value, "short": true}))
                    .collect::<Vec<_>>(),
                "footer": FOOTER,
                "ts": Utc::now().timestamp(),
            }],
        }),
        WebhookFormat::Discord => json!({
            "content": headline,
            "embeds": [{
                "color": colour.discord(),
                "fields": fields
                    .iter()
                    .map(|(name, value)| json!({"name": name, "value": value, "inline": true}))
                    .collect::<Vec<_>>(),
                "footer": {"text": FOOTER},
                "timestamp": Utc::now().to_rfc3339(),
            }],
        }),
    }
}

/// Picks the notifier the configuration asks for
///
/// A webhook is used only when notifications are enabled and a URL is set;
/// otherwise the summary goes to the log.
pub fn notifier_from_config(config: &NotifierConfig, client: Client) -> Arc<dyn Notifier> {
    match (config.enabled, config.webhook_url.as_deref()) {
        (true, Some(url)) => Arc::new(WebhookNotifier::new(client, url, config.webhook_format)),
        _ => Arc::new(LogNotifier),
    }
}
