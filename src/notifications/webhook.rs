//! Outbound webhook delivery of job lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::server::metrics::JobMetrics;

pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 5;

const COLOR_OK_HEX: &str = "#36a64f";
const COLOR_ERROR_HEX: &str = "#ff0000";
const COLOR_OK: u32 = 0x36a64f;
const COLOR_ERROR: u32 = 0xff0000;

/// Payload shape expected by the receiving endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    #[default]
    Generic,
    Slack,
    Discord,
}

impl WebhookKind {
    /// Unknown names fall back to the generic payload.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "slack" => WebhookKind::Slack,
            "discord" => WebhookKind::Discord,
            _ => WebhookKind::Generic,
        }
    }
}

impl<'de> Deserialize<'de> for WebhookKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(WebhookKind::from_name(&name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    pub url: Option<String>,
    pub kind: WebhookKind,
    pub timeout_secs: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            url: None,
            kind: WebhookKind::Generic,
            timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Started,
    Completed,
    Error,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::Started => "job_started",
            JobEvent::Completed => "job_completed",
            JobEvent::Error => "job_error",
        }
    }

    /// "job_completed" -> "Job Completed"
    fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The job fields carried by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub job_id: String,
    pub playbook: String,
    pub status: String,
    pub error: Option<String>,
}

fn is_ok_status(status: &str) -> bool {
    matches!(status, "running" | "completed")
}

/// Build the JSON body for `kind`.
pub fn format_payload(
    kind: WebhookKind,
    event: JobEvent,
    snapshot: &JobSnapshot,
    now: DateTime<Utc>,
) -> Value {
    match kind {
        WebhookKind::Generic => {
            let mut payload = json!({
                "event_type": event.as_str(),
                "job_id": snapshot.job_id,
                "playbook": snapshot.playbook,
                "status": snapshot.status,
                "timestamp": now.to_rfc3339(),
            });
            if let Some(error) = &snapshot.error {
                payload["error"] = json!(error);
            }
            payload
        }
        WebhookKind::Slack => {
            let mut fields = vec![json!({"title": "Status", "value": snapshot.status, "short": true})];
            if let Some(error) = &snapshot.error {
                fields.push(json!({"title": "Error", "value": error, "short": false}));
            }
            let color = if is_ok_status(&snapshot.status) {
                COLOR_OK_HEX
            } else {
                COLOR_ERROR_HEX
            };
            json!({
                "attachments": [{
                    "color": color,
                    "title": snapshot.playbook,
                    "text": format!("Event: {}", event.title()),
                    "fields": fields,
                    "footer": format!("Ansible-Link | {}", snapshot.job_id),
                    "ts": now.timestamp(),
                }]
            })
        }
        WebhookKind::Discord => {
            let mut fields = vec![
                json!({"name": "Status", "value": snapshot.status, "inline": true}),
                json!({"name": "Job ID", "value": snapshot.job_id, "inline": true}),
                json!({"name": "Event", "value": event.title(), "inline": false}),
            ];
            if let Some(error) = &snapshot.error {
                fields.push(json!({"name": "Error", "value": error, "inline": false}));
            }
            let color = if is_ok_status(&snapshot.status) {
                COLOR_OK
            } else {
                COLOR_ERROR
            };
            json!({
                "embeds": [{
                    "title": snapshot.playbook,
                    "color": color,
                    "fields": fields,
                    "footer": {"text": "Ansible-Link"},
                    "timestamp": now.to_rfc3339(),
                }]
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Endpoint returned status {0}")]
    Status(reqwest::StatusCode),
}

/// Result of one best-effort delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No endpoint configured, nothing was sent.
    Skipped,
    Delivered,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Skipped => "skipped",
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

/// Receives lifecycle events from the job runner.
///
/// Implementations must never fail the caller.
#[async_trait]
pub trait JobNotifier: Send + Sync {
    async fn notify(&self, event: JobEvent, snapshot: &JobSnapshot) -> DeliveryOutcome;
}

pub struct WebhookNotifier {
    settings: WebhookSettings,
    client: reqwest::Client,
    metrics: Option<Arc<JobMetrics>>,
}

impl WebhookNotifier {
    pub fn new(settings: WebhookSettings) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(WebhookError::Client)?;
        Ok(Self {
            settings,
            client,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn deliver(&self, url: &str, payload: &Value) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::Status(response.status()));
        }
        Ok(())
    }

    /// Send `event` for `snapshot`. Failures are logged, never returned.
    pub async fn send(&self, event: JobEvent, snapshot: &JobSnapshot) -> DeliveryOutcome {
        let outcome = match &self.settings.url {
            None => {
                debug!("Webhook URL not configured, skipping {}", event.as_str());
                DeliveryOutcome::Skipped
            }
            Some(url) => {
                let payload = format_payload(self.settings.kind, event, snapshot, Utc::now());
                match self.deliver(url, &payload).await {
                    Ok(()) => {
                        info!(
                            "Webhook {} sent for job {}",
                            event.as_str(),
                            snapshot.job_id
                        );
                        DeliveryOutcome::Delivered
                    }
                    Err(e) => {
                        error!(
                            "Failed to send webhook {} for job {}: {}",
                            event.as_str(),
                            snapshot.job_id,
                            e
                        );
                        DeliveryOutcome::Failed
                    }
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_webhook(outcome);
        }
        outcome
    }
}

#[async_trait]
impl JobNotifier for WebhookNotifier {
    async fn notify(&self, event: JobEvent, snapshot: &JobSnapshot) -> DeliveryOutcome {
        self.send(event, snapshot).await
    }
}
