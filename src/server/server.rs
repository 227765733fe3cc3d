use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::metrics::metrics_handler;
use super::{log_requests, state::*, ServerConfig};
use crate::job_store::JobStoreError;
use crate::jobs::SubmitError;

/// Prefix of the job endpoints.
pub const API_PREFIX: &str = "/api/v1/ansible";

#[derive(Serialize)]
struct ServerStats {
    pub status: &'static str,
    pub uptime: String,
    pub jobs_in_flight: usize,
}

/// Body of every `POST /playbook` response.
#[derive(Serialize)]
struct SubmitResponse {
    job_id: Option<String>,
    status: &'static str,
    errors: Option<Vec<String>>,
}

impl SubmitResponse {
    fn rejected(status: StatusCode, errors: Vec<String>) -> Response {
        let body = SubmitResponse {
            job_id: None,
            status: "error",
            errors: Some(errors),
        };
        (status, Json(body)).into_response()
    }
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

fn store_error_response(e: JobStoreError) -> Response {
    error!("Job store error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"message": e.to_string()})),
    )
        .into_response()
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        status: "healthy",
        uptime: format_uptime(state.start_time.elapsed()),
        jobs_in_flight: state.job_manager.in_flight(),
    };
    Json(stats)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

async fn version() -> impl IntoResponse {
    Json(json!({"version": env!("CARGO_PKG_VERSION")}))
}

async fn submit_playbook(State(job_manager): State<GuardedJobManager>, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Rejected job submission with malformed body: {}", e);
            return SubmitResponse::rejected(
                StatusCode::BAD_REQUEST,
                vec![format!("Invalid JSON body: {}", e)],
            );
        }
    };

    match job_manager.submit(&raw) {
        Ok(job) => {
            let body = SubmitResponse {
                job_id: Some(job.id),
                status: "running",
                errors: None,
            };
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        Err(e) => {
            let status = match &e {
                SubmitError::Validation(_) => StatusCode::BAD_REQUEST,
                SubmitError::QueueFull(_) | SubmitError::ShuttingDown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SubmitError::Store(_) => {
                    error!("Failed to create job: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            SubmitResponse::rejected(status, e.messages())
        }
    }
}

async fn list_jobs(State(job_manager): State<GuardedJobManager>) -> Response {
    match job_manager.list() {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn get_job(State(job_manager): State<GuardedJobManager>, Path(id): Path<String>) -> Response {
    match job_manager.get(&id) {
        Ok(job) => Json(job).into_response(),
        Err(JobStoreError::NotFound(_)) => {
            warn!("Job {} not found", id);
            (
                StatusCode::NOT_FOUND,
                Json(json!({"message": format!("Job {} not found", id)})),
            )
                .into_response()
        }
        Err(e) => store_error_response(e),
    }
}

async fn available_playbooks(State(job_manager): State<GuardedJobManager>) -> impl IntoResponse {
    Json(json!({"playbooks": job_manager.available_playbooks()}))
}

pub fn make_app(config: ServerConfig, job_manager: GuardedJobManager) -> Router {
    let state = ServerState::new(config, job_manager);

    let job_routes: Router = Router::new()
        .route("/playbook", post(submit_playbook))
        .route("/jobs", get(list_jobs))
        .route("/job/{id}", get(get_job))
        .route("/available-playbooks", get(available_playbooks))
        .with_state(state.clone());

    let app: Router = Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/version", get(version))
        .with_state(state.clone())
        .nest(API_PREFIX, job_routes);

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

pub async fn run_server<F>(
    config: ServerConfig,
    job_manager: GuardedJobManager,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = format!("{}:{}", config.host, config.port);
    let app = make_app(config, job_manager);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Ready to serve at {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

/// Serve `/metrics` on its own port, for Prometheus scraping.
pub async fn run_metrics_server<F>(host: String, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = format!("{}:{}", host, port);
    let app = Router::new().route("/metrics", get(metrics_handler));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind metrics listener {}", address))?;
    info!("Metrics available at {}/metrics", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Metrics server error")
}
