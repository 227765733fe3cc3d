//! Job admission and dispatch.
//!
//! `JobManager` is the entry point of the HTTP layer: it validates a
//! submission, creates the pending record and hands the job to a worker task.
//! At most `max_concurrent_jobs` jobs run at once; up to `max_queued_jobs`
//! more wait for a worker slot, anything beyond that is rejected.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::runner::JobRunner;
use crate::job_store::{Job, JobStatus, JobStore, JobStoreError, JobSummary};
use crate::server::metrics::JobMetrics;
use crate::validation::RequestValidator;

pub const INTERRUPTED_MESSAGE: &str = "Job interrupted by server restart";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_concurrent_jobs: usize,
    pub max_queued_jobs: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_queued_jobs: 64,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Job queue is full ({0} jobs accepted and not finished)")]
    QueueFull(usize),

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Failed to create job record: {0}")]
    Store(#[from] JobStoreError),
}

impl SubmitError {
    /// Messages reported to the submitter.
    pub fn messages(&self) -> Vec<String> {
        match self {
            SubmitError::Validation(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

/// Outcome of startup recovery.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs found running and marked as error.
    pub interrupted: Vec<String>,
    /// Pending jobs dispatched again.
    pub resumed: Vec<String>,
}

/// Releases an admission slot when a job task ends, however it ends.
struct SlotGuard(Arc<AtomicUsize>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct JobManager {
    validator: RequestValidator,
    store: Arc<dyn JobStore>,
    runner: Arc<JobRunner>,
    metrics: Arc<JobMetrics>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
    accepting: AtomicBool,
}

impl JobManager {
    pub fn new(
        validator: RequestValidator,
        store: Arc<dyn JobStore>,
        runner: Arc<JobRunner>,
        metrics: Arc<JobMetrics>,
        pool: PoolSettings,
    ) -> Self {
        let max_concurrent = pool.max_concurrent_jobs.max(1);
        Self {
            validator,
            store,
            runner,
            metrics,
            workers: Arc::new(Semaphore::new(max_concurrent)),
            tracker: TaskTracker::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: max_concurrent + pool.max_queued_jobs,
            accepting: AtomicBool::new(true),
        }
    }

    /// Validate and accept a submission. Returns the pending record.
    ///
    /// No record is created unless the submission is accepted.
    pub fn submit(&self, raw: &Value) -> Result<Job, SubmitError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError::ShuttingDown);
        }

        let validated = self.validator.validate(raw).map_err(|errors| {
            warn!("Rejected job submission: {}", errors.join("; "));
            SubmitError::Validation(errors)
        })?;

        let slot = self.reserve_slot()?;

        let job = Job::new(
            Uuid::new_v4().to_string(),
            validated.playbook_path,
            validated.inventory_path,
            validated.vars,
            validated.options,
        );
        self.store.create(&job)?;
        info!("Accepted job {} for {}", job.id, job.playbook_label());

        self.dispatch(job.clone(), slot);
        Ok(job)
    }

    fn reserve_slot(&self) -> Result<SlotGuard, SubmitError> {
        let max = self.max_in_flight;
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|current| {
                warn!("Rejected job submission: queue full ({} in flight)", current);
                SubmitError::QueueFull(current)
            })?;
        Ok(SlotGuard(self.in_flight.clone()))
    }

    fn dispatch(&self, job: Job, slot: SlotGuard) {
        let workers = self.workers.clone();
        let runner = self.runner.clone();
        let metrics = self.metrics.clone();

        metrics.job_queued();
        self.tracker.spawn(async move {
            let _slot = slot;
            let permit = workers.acquire_owned().await;
            metrics.job_dequeued();
            match permit {
                Ok(_permit) => runner.execute(job).await,
                Err(e) => error!("Job {} could not acquire a worker: {}", job.id, e),
            }
        });
    }

    pub fn get(&self, id: &str) -> Result<Job, JobStoreError> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<BTreeMap<String, JobSummary>, JobStoreError> {
        self.store.list()
    }

    pub fn available_playbooks(&self) -> Vec<String> {
        self.validator.paths().available_playbooks()
    }

    /// Accepted jobs that have not finished yet, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Settle jobs left behind by a previous process.
    ///
    /// Running jobs lost their engine process and become `error`; pending
    /// jobs never started and are dispatched again.
    pub fn recover(&self) -> Result<RecoveryReport, JobStoreError> {
        let mut report = RecoveryReport::default();

        for job in self.store.list_jobs()? {
            match job.status {
                JobStatus::Running => {
                    let result = self.store.update(&job.id, &mut |record| {
                        record.status = JobStatus::Error;
                        record.errors.push(INTERRUPTED_MESSAGE.to_string());
                        record.stderr = Some(INTERRUPTED_MESSAGE.to_string());
                        record.stats = Some(json!({}));
                        record.end_time = Some(Utc::now());
                    });
                    match result {
                        Ok(_) => {
                            self.metrics
                                .record_run(&job.playbook_label(), JobStatus::Error.as_str());
                            report.interrupted.push(job.id);
                        }
                        Err(e) => error!("Failed to mark job {} as interrupted: {}", job.id, e),
                    }
                }
                JobStatus::Pending => {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    let slot = SlotGuard(self.in_flight.clone());
                    report.resumed.push(job.id.clone());
                    self.dispatch(job, slot);
                }
                _ => {}
            }
        }

        if !report.interrupted.is_empty() || !report.resumed.is_empty() {
            info!(
                "Recovered jobs from previous run: {} interrupted, {} resumed",
                report.interrupted.len(),
                report.resumed.len()
            );
        }
        Ok(report)
    }

    /// Stop accepting jobs and wait up to `timeout` for accepted ones.
    ///
    /// Returns false if jobs were still running when the timeout expired.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        self.tracker.close();

        let pending = self.in_flight();
        if pending > 0 {
            info!("Waiting for {} jobs to finish...", pending);
        }
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "Shutdown timeout reached with {} jobs still in flight",
                    self.in_flight()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineFlags, EngineStatus, PlaybookEngine};
    use crate::job_store::{FileJobStore, JobOptions};
    use crate::jobs::runner::tests::{FakeEngine, RecordingNotifier};
    use crate::jobs::runner::RunnerSettings;
    use crate::notifications::{JobNotifier, WebhookNotifier, WebhookSettings};
    use crate::validation::PathValidator;
    use serde_json::Map;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        temp_dir: TempDir,
        store: Arc<FileJobStore>,
        metrics: Arc<JobMetrics>,
        manager: Arc<JobManager>,
    }

    fn make_fixture_with(
        engine: FakeEngine,
        notifier: Arc<dyn JobNotifier>,
        pool: PoolSettings,
    ) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let playbooks = temp_dir.path().join("playbooks");
        let inventory = temp_dir.path().join("inventory");
        fs::create_dir_all(&playbooks).unwrap();
        fs::create_dir_all(&inventory).unwrap();
        fs::write(playbooks.join("site.yml"), "- hosts: all\n").unwrap();
        fs::write(inventory.join("hosts"), "localhost\n").unwrap();

        let jobs_dir = temp_dir.path().join("jobs");
        let store = Arc::new(FileJobStore::new(&jobs_dir).unwrap());
        let metrics = Arc::new(JobMetrics::new());
        let engine: Arc<dyn PlaybookEngine> = Arc::new(engine);
        let runner = Arc::new(JobRunner::new(
            store.clone(),
            engine,
            notifier,
            metrics.clone(),
            RunnerSettings {
                job_storage_dir: jobs_dir,
                flags: EngineFlags::default(),
            },
        ));
        let validator = RequestValidator::new(PathValidator::new(
            &playbooks,
            &inventory,
            inventory.join("hosts"),
            Vec::new(),
        ));
        let manager = Arc::new(JobManager::new(
            validator,
            store.clone(),
            runner,
            metrics.clone(),
            pool,
        ));

        Fixture {
            temp_dir,
            store,
            metrics,
            manager,
        }
    }

    fn make_fixture(engine: FakeEngine) -> Fixture {
        make_fixture_with(
            engine,
            Arc::new(RecordingNotifier::default()),
            PoolSettings::default(),
        )
    }

    fn slow_engine(delay: Duration) -> FakeEngine {
        let inner = FakeEngine::with_status(EngineStatus::Successful);
        FakeEngine::new(move |request| {
            std::thread::sleep(delay);
            inner.run(request)
        })
    }

    #[tokio::test]
    async fn test_submit_then_get() {
        let fixture = make_fixture(slow_engine(Duration::from_millis(100)));

        let job = fixture
            .manager
            .submit(&json!({"playbook": "site.yml"}))
            .unwrap();

        let record = fixture.manager.get(&job.id).unwrap();
        assert!(matches!(
            record.status,
            JobStatus::Pending | JobStatus::Running
        ));
        assert_eq!(
            record.playbook_path,
            fixture.temp_dir.path().join("playbooks/site.yml")
        );

        assert!(fixture.manager.shutdown(Duration::from_secs(5)).await);
        assert_eq!(
            fixture.manager.get(&job.id).unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_validation_failure_creates_nothing() {
        let fixture = make_fixture(FakeEngine::with_status(EngineStatus::Successful));

        let err = fixture
            .manager
            .submit(&json!({"playbook": "missing.yml", "vars": [1, 2]}))
            .unwrap_err();

        assert!(err.messages().len() >= 2);
        assert!(matches!(err, SubmitError::Validation(_)));
        assert!(fixture.manager.list().unwrap().is_empty());
        assert_eq!(fixture.manager.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_submissions() {
        let fixture = make_fixture_with(
            slow_engine(Duration::from_millis(20)),
            Arc::new(RecordingNotifier::default()),
            PoolSettings {
                max_concurrent_jobs: 4,
                max_queued_jobs: 100,
            },
        );

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let manager = fixture.manager.clone();
                tokio::spawn(async move { manager.submit(&json!({"playbook": "site.yml"})) })
            })
            .collect();
        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap().id);
        }
        assert_eq!(ids.len(), 20);

        assert!(fixture.manager.shutdown(Duration::from_secs(10)).await);

        let listing = fixture.manager.list().unwrap();
        assert_eq!(listing.len(), 20);
        for id in &ids {
            assert_eq!(listing[id].status, JobStatus::Completed);
        }
        assert_eq!(fixture.metrics.active_jobs(), 0);
        assert_eq!(fixture.metrics.queued_jobs(), 0);
        assert_eq!(fixture.manager.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_queue_full() {
        let fixture = make_fixture_with(
            slow_engine(Duration::from_millis(300)),
            Arc::new(RecordingNotifier::default()),
            PoolSettings {
                max_concurrent_jobs: 1,
                max_queued_jobs: 1,
            },
        );
        let request = json!({"playbook": "site.yml"});

        fixture.manager.submit(&request).unwrap();
        fixture.manager.submit(&request).unwrap();
        let err = fixture.manager.submit(&request).unwrap_err();

        assert!(matches!(err, SubmitError::QueueFull(2)));
        assert_eq!(fixture.manager.list().unwrap().len(), 2);

        assert!(fixture.manager.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_no_webhook_endpoint() {
        let metrics = Arc::new(JobMetrics::new());
        let notifier = Arc::new(
            WebhookNotifier::new(WebhookSettings::default())
                .unwrap()
                .with_metrics(metrics.clone()),
        );
        let fixture = make_fixture_with(
            FakeEngine::with_status(EngineStatus::Successful),
            notifier,
            PoolSettings::default(),
        );

        let job = fixture
            .manager
            .submit(&json!({"playbook": "site.yml"}))
            .unwrap();
        assert!(fixture.manager.shutdown(Duration::from_secs(5)).await);

        assert_eq!(
            fixture.store.get(&job.id).unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(metrics.webhook_deliveries("skipped"), 2);
        assert_eq!(metrics.webhook_deliveries("failed"), 0);
        assert_eq!(metrics.webhook_deliveries("delivered"), 0);
    }

    #[tokio::test]
    async fn test_recover_previous_run() {
        let fixture = make_fixture(FakeEngine::with_status(EngineStatus::Successful));
        let make = |id: &str| {
            Job::new(
                id.to_string(),
                fixture.temp_dir.path().join("playbooks/site.yml"),
                fixture.temp_dir.path().join("inventory/hosts"),
                Map::new(),
                JobOptions::default(),
            )
        };
        fixture.store.create(&make("was-running")).unwrap();
        fixture
            .store
            .update("was-running", &mut |job| job.status = JobStatus::Running)
            .unwrap();
        fixture.store.create(&make("was-pending")).unwrap();

        let report = fixture.manager.recover().unwrap();
        assert_eq!(report.interrupted, vec!["was-running".to_string()]);
        assert_eq!(report.resumed, vec!["was-pending".to_string()]);

        assert!(fixture.manager.shutdown(Duration::from_secs(5)).await);

        let interrupted = fixture.store.get("was-running").unwrap();
        assert_eq!(interrupted.status, JobStatus::Error);
        assert_eq!(interrupted.errors, vec![INTERRUPTED_MESSAGE.to_string()]);
        assert_eq!(
            fixture.store.get("was-pending").unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let fixture = make_fixture(FakeEngine::with_status(EngineStatus::Successful));
        assert!(fixture.manager.shutdown(Duration::from_secs(1)).await);

        let err = fixture
            .manager
            .submit(&json!({"playbook": "site.yml"}))
            .unwrap_err();
        assert!(matches!(err, SubmitError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_available_playbooks() {
        let fixture = make_fixture(FakeEngine::with_status(EngineStatus::Successful));
        fs::write(
            fixture.temp_dir.path().join("playbooks/deploy.yaml"),
            "- hosts: all\n",
        )
        .unwrap();

        assert_eq!(
            fixture.manager.available_playbooks(),
            vec!["deploy.yaml".to_string(), "site.yml".to_string()]
        );
    }
}
