use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::notifications::DeliveryOutcome;

/// Metric name prefix for all service metrics
const PREFIX: &str = "ansible_link";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Job metrics of the running service
    pub static ref JOB_METRICS: Arc<JobMetrics> = Arc::new(JobMetrics::new());
}

/// Playbook run metrics.
///
/// Instances are created unregistered so tests can own isolated copies; the
/// process-wide instance is [`JOB_METRICS`].
pub struct JobMetrics {
    runs_total: IntCounterVec,
    duration_seconds: HistogramVec,
    active_jobs: IntGauge,
    queued_jobs: IntGauge,
    webhook_deliveries_total: IntCounterVec,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self {
            runs_total: IntCounterVec::new(
                Opts::new(
                    format!("{PREFIX}_playbook_runs_total"),
                    "Total number of playbook runs",
                ),
                &["playbook", "status"],
            )
            .expect("Failed to create playbook_runs_total metric"),
            duration_seconds: HistogramVec::new(
                HistogramOpts::new(
                    format!("{PREFIX}_playbook_duration_seconds"),
                    "Duration of playbook runs in seconds",
                )
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]),
                &["playbook"],
            )
            .expect("Failed to create playbook_duration_seconds metric"),
            active_jobs: IntGauge::new(
                format!("{PREFIX}_active_jobs"),
                "Number of currently running playbook jobs",
            )
            .expect("Failed to create active_jobs metric"),
            queued_jobs: IntGauge::new(
                format!("{PREFIX}_queued_jobs"),
                "Number of accepted jobs waiting for a worker",
            )
            .expect("Failed to create queued_jobs metric"),
            webhook_deliveries_total: IntCounterVec::new(
                Opts::new(
                    format!("{PREFIX}_webhook_deliveries_total"),
                    "Webhook delivery attempts by outcome",
                ),
                &["outcome"],
            )
            .expect("Failed to create webhook_deliveries_total metric"),
        }
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.runs_total.clone()))?;
        registry.register(Box::new(self.duration_seconds.clone()))?;
        registry.register(Box::new(self.active_jobs.clone()))?;
        registry.register(Box::new(self.queued_jobs.clone()))?;
        registry.register(Box::new(self.webhook_deliveries_total.clone()))?;
        Ok(())
    }

    pub fn job_started(&self) {
        self.active_jobs.inc();
    }

    /// Leave the active set and record how long the job took.
    pub fn job_finished(&self, playbook: &str, elapsed: Duration) {
        self.active_jobs.dec();
        self.duration_seconds
            .with_label_values(&[playbook])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_run(&self, playbook: &str, status: &str) {
        self.runs_total.with_label_values(&[playbook, status]).inc();
    }

    pub fn job_queued(&self) {
        self.queued_jobs.inc();
    }

    pub fn job_dequeued(&self) {
        self.queued_jobs.dec();
    }

    pub fn record_webhook(&self, outcome: DeliveryOutcome) {
        self.webhook_deliveries_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn active_jobs(&self) -> i64 {
        self.active_jobs.get()
    }

    pub fn queued_jobs(&self) -> i64 {
        self.queued_jobs.get()
    }

    pub fn runs(&self, playbook: &str, status: &str) -> u64 {
        self.runs_total.with_label_values(&[playbook, status]).get()
    }

    pub fn duration_samples(&self, playbook: &str) -> u64 {
        self.duration_seconds
            .with_label_values(&[playbook])
            .get_sample_count()
    }

    pub fn webhook_deliveries(&self, outcome: &str) -> u64 {
        self.webhook_deliveries_total
            .with_label_values(&[outcome])
            .get()
    }
}

impl Default for JobMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = JOB_METRICS.register(&REGISTRY);

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
