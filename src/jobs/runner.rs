//! Execution of a single job.
//!
//! The runner owns a job from `pending` until its terminal write. Metrics
//! and notifications for a terminal state are emitted only after that
//! state has been persisted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::engine::{
    EngineError, EngineFlags, EngineResult, EngineStatus, ExecutionRequest, PlaybookEngine,
};
use crate::job_store::{Job, JobStatus, JobStore, JobStoreError};
use crate::notifications::{JobEvent, JobNotifier, JobSnapshot};
use crate::server::metrics::JobMetrics;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Parent of the per-job working directories.
    pub job_storage_dir: PathBuf,
    pub flags: EngineFlags,
}

/// Anything that prevents a job from reaching `completed` or `failed`.
#[derive(Debug, Error)]
enum ExecutionError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Failed to persist job state: {0}")]
    Store(#[from] JobStoreError),

    #[error("Failed to create working directory {}: {source}", .path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine task panicked: {0}")]
    Panicked(String),
}

pub struct JobRunner {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn PlaybookEngine>,
    notifier: Arc<dyn JobNotifier>,
    metrics: Arc<JobMetrics>,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn PlaybookEngine>,
        notifier: Arc<dyn JobNotifier>,
        metrics: Arc<JobMetrics>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            engine,
            notifier,
            metrics,
            settings,
        }
    }

    pub fn work_dir(&self, job_id: &str) -> PathBuf {
        self.settings.job_storage_dir.join(job_id)
    }

    /// Run `job` to a terminal state. Never fails: every problem ends up in
    /// the job record as status `error`.
    pub async fn execute(&self, job: Job) {
        let playbook = job.playbook_label();
        let started = Instant::now();
        self.metrics.job_started();

        match self.run_to_completion(&job).await {
            Ok(finished) => {
                info!("Job {} finished with status {}", finished.id, finished.status);
                self.metrics.record_run(&playbook, finished.status.as_str());
                self.notifier
                    .notify(JobEvent::Completed, &snapshot(&finished, None))
                    .await;
            }
            Err(e) => self.fail_job(&job, &playbook, e.to_string()).await,
        }

        self.metrics.job_finished(&playbook, started.elapsed());
    }

    async fn run_to_completion(&self, job: &Job) -> Result<Job, ExecutionError> {
        let running = self
            .store
            .update(&job.id, &mut |record| record.status = JobStatus::Running)?;
        info!("Job {} started: {}", running.id, running.playbook_label());
        self.notifier
            .notify(JobEvent::Started, &snapshot(&running, None))
            .await;

        let work_dir = self.work_dir(&job.id);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|source| ExecutionError::WorkDir {
                path: work_dir.clone(),
                source,
            })?;

        let request = ExecutionRequest {
            job_id: job.id.clone(),
            playbook: job.playbook_path.clone(),
            inventory: job.inventory_path.clone(),
            extra_vars: job.vars.clone(),
            options: job.options.clone(),
            work_dir,
            flags: self.settings.flags,
        };

        let engine = self.engine.clone();
        let result = tokio::task::spawn_blocking(move || engine.run(&request))
            .await
            .map_err(|e| ExecutionError::Panicked(e.to_string()))??;

        let finished = self.store.update(&job.id, &mut |record| {
            apply_engine_result(record, &result)
        })?;
        Ok(finished)
    }

    async fn fail_job(&self, job: &Job, playbook: &str, message: String) {
        error!("Job {} failed with an error: {}", job.id, message);

        // Nothing is reported for a job whose error state was not persisted
        let record = match self.mark_error(&job.id, &message) {
            Ok(record) => record,
            Err(e) => {
                error!("Could not record error state for job {}: {}", job.id, e);
                return;
            }
        };

        self.metrics.record_run(playbook, JobStatus::Error.as_str());
        self.notifier
            .notify(JobEvent::Error, &snapshot(&record, Some(message)))
            .await;
    }

    fn mark_error(&self, id: &str, message: &str) -> Result<Job, JobStoreError> {
        // Error is only reachable from running
        if self.store.get(id)?.status == JobStatus::Pending {
            self.store
                .update(id, &mut |record| record.status = JobStatus::Running)?;
        }
        self.store.update(id, &mut |record| {
            record.status = JobStatus::Error;
            record.errors.push(message.to_string());
            record.stdout = Some(String::new());
            record.stderr = Some(message.to_string());
            record.stats = Some(json!({}));
            record.end_time = Some(Utc::now());
        })
    }
}

fn apply_engine_result(record: &mut Job, result: &EngineResult) {
    record.status = match result.status {
        EngineStatus::Successful => JobStatus::Completed,
        EngineStatus::Failed => JobStatus::Failed,
    };
    record.stdout = Some(result.stdout.clone());
    record.stderr = Some(result.stderr.clone());
    record.stats = Some(result.stats.clone());
    record.ansible_cli_command = Some(result.command.clone());
    record.end_time = Some(Utc::now());
}

fn snapshot(job: &Job, error: Option<String>) -> JobSnapshot {
    JobSnapshot {
        job_id: job.id.clone(),
        playbook: job.playbook_label(),
        status: job.status.to_string(),
        error,
    }
}
