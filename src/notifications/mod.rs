//! Job lifecycle notifications

mod webhook;

pub use webhook::{
    format_payload, DeliveryOutcome, JobEvent, JobNotifier, JobSnapshot, WebhookError,
    WebhookKind, WebhookNotifier, WebhookSettings, DEFAULT_WEBHOOK_TIMEOUT_SECS,
};
