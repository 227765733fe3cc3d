//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own playbooks, inventories
//! and job storage.

use super::constants::*;
use super::fixtures::{create_fixture, Fixture};
use ansible_link::engine::{AnsiblePlaybookEngine, EngineFlags};
use ansible_link::job_store::{FileJobStore, JobStore};
use ansible_link::jobs::{JobManager, JobRunner, PoolSettings, RunnerSettings};
use ansible_link::notifications::{WebhookNotifier, WebhookSettings};
use ansible_link::server::metrics::JobMetrics;
use ansible_link::server::{make_app, RequestsLoggingLevel, ServerConfig};
use ansible_link::validation::{PathValidator, RequestValidator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Test server instance with isolated fixtures
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Where job records are written, for direct inspection in tests
    pub job_storage_dir: PathBuf,

    // Private fields - keep resources alive until drop
    _fixture: Fixture,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port with default pool settings
    pub async fn spawn() -> Self {
        Self::spawn_with(PoolSettings::default(), Vec::new()).await
    }

    /// Spawns a new test server
    ///
    /// # Panics
    ///
    /// Panics if the fixture cannot be created, the port cannot be bound
    /// or the server doesn't become ready within timeout.
    pub async fn spawn_with(pool: PoolSettings, whitelist: Vec<String>) -> Self {
        let fixture = create_fixture().expect("Failed to create test fixture");

        let store: Arc<dyn JobStore> = Arc::new(
            FileJobStore::new(&fixture.job_storage_dir).expect("Failed to open job store"),
        );
        let metrics = Arc::new(JobMetrics::new());
        let notifier = Arc::new(
            WebhookNotifier::new(WebhookSettings::default())
                .expect("Failed to build webhook notifier")
                .with_metrics(metrics.clone()),
        );
        let runner = Arc::new(JobRunner::new(
            store.clone(),
            Arc::new(AnsiblePlaybookEngine::new(&fixture.engine_binary)),
            notifier,
            metrics.clone(),
            RunnerSettings {
                job_storage_dir: fixture.job_storage_dir.clone(),
                flags: EngineFlags::default(),
            },
        ));
        let whitelist =
            PathValidator::compile_whitelist(&whitelist).expect("Invalid whitelist pattern");
        let validator = RequestValidator::new(PathValidator::new(
            &fixture.playbook_dir,
            &fixture.inventory_dir,
            &fixture.default_inventory,
            whitelist,
        ));
        let job_manager = Arc::new(JobManager::new(
            validator,
            store,
            runner,
            metrics,
            pool,
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            ..Default::default()
        };
        let app = make_app(config, job_manager);

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            job_storage_dir: fixture.job_storage_dir.clone(),
            _fixture: fixture,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the /health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
