use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ansible_link::config;
use ansible_link::engine::AnsiblePlaybookEngine;
use ansible_link::job_store::{FileJobStore, JobStore};
use ansible_link::jobs::{JobManager, JobRunner, RunnerSettings};
use ansible_link::notifications::WebhookNotifier;
use ansible_link::server::metrics::{self, JOB_METRICS};
use ansible_link::server::{run_metrics_server, run_server, RequestsLoggingLevel};
use ansible_link::validation::RequestValidator;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
#[clap(version, about)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the playbooks that may be run.
    #[clap(long, value_parser = parse_dir)]
    pub playbook_dir: Option<PathBuf>,

    /// Inventory used when a request does not name one.
    #[clap(long, value_parser = parse_path)]
    pub inventory_file: Option<PathBuf>,

    /// Directory request-supplied inventories are resolved against.
    /// Defaults to the directory of --inventory-file.
    #[clap(long, value_parser = parse_path)]
    pub inventory_dir: Option<PathBuf>,

    /// Where job records and per-job working directories are kept.
    #[clap(long, value_parser = parse_path)]
    pub job_storage_dir: Option<PathBuf>,

    /// The address to bind both listeners to.
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 5001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 8000)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// The ansible-playbook executable.
    #[clap(long, default_value = config::DEFAULT_ANSIBLE_PLAYBOOK_BIN)]
    pub ansible_playbook_bin: String,

    /// How many playbooks may run at the same time.
    #[clap(long, default_value_t = 4)]
    pub max_concurrent_jobs: usize,

    /// How many accepted jobs may wait for a free worker.
    #[clap(long, default_value_t = 64)]
    pub max_queued_jobs: usize,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            playbook_dir: args.playbook_dir.clone(),
            inventory_dir: args.inventory_dir.clone(),
            inventory_file: args.inventory_file.clone(),
            job_storage_dir: args.job_storage_dir.clone(),
            host: args.host.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            ansible_playbook_bin: args.ansible_playbook_bin.clone(),
            max_concurrent_jobs: args.max_concurrent_jobs,
            max_queued_jobs: args.max_queued_jobs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => Some(config::FileConfig::load(path)?),
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    let default_level = app_config
        .log_level
        .as_deref()
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    if let Some(path) = &cli_args.config {
        info!("Configuration loaded from {:?}", path);
    }
    info!("Configuration:");
    info!("  playbook_dir: {:?}", app_config.playbook_dir);
    info!("  inventory_dir: {:?}", app_config.inventory_dir);
    info!("  inventory_file: {:?}", app_config.inventory_file);
    info!("  job_storage_dir: {:?}", app_config.job_storage_dir);
    info!("  ansible_playbook_bin: {:?}", app_config.ansible_playbook_bin);
    info!("  playbook_whitelist: {:?}", app_config.playbook_whitelist);
    info!(
        "  workers: {} (queue {})",
        app_config.pool.max_concurrent_jobs, app_config.pool.max_queued_jobs
    );
    match &app_config.webhook.url {
        Some(_) => info!("  webhook: {:?}", app_config.webhook.kind),
        None => info!("  webhook: disabled"),
    }

    metrics::init_metrics();

    let store: Arc<dyn JobStore> = Arc::new(
        FileJobStore::new(&app_config.job_storage_dir).with_context(|| {
            format!(
                "Failed to open job storage at {:?}",
                app_config.job_storage_dir
            )
        })?,
    );
    let engine = Arc::new(AnsiblePlaybookEngine::new(
        app_config.ansible_playbook_bin.clone(),
    ));
    let notifier = Arc::new(
        WebhookNotifier::new(app_config.webhook.clone())
            .context("Failed to build webhook client")?
            .with_metrics(JOB_METRICS.clone()),
    );
    let runner = Arc::new(JobRunner::new(
        store.clone(),
        engine,
        notifier,
        JOB_METRICS.clone(),
        RunnerSettings {
            job_storage_dir: app_config.job_storage_dir.clone(),
            flags: app_config.engine_flags,
        },
    ));
    let job_manager = Arc::new(JobManager::new(
        RequestValidator::new(app_config.path_validator()?),
        store,
        runner,
        JOB_METRICS.clone(),
        app_config.pool,
    ));

    job_manager
        .recover()
        .context("Failed to recover jobs from a previous run")?;

    let shutdown_token = CancellationToken::new();
    {
        let token = shutdown_token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                    token.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        });
    }

    let metrics_server = tokio::spawn(run_metrics_server(
        app_config.host.clone(),
        app_config.metrics_port,
        shutdown_token.clone().cancelled_owned(),
    ));

    let result = run_server(
        app_config.server_config(),
        job_manager.clone(),
        shutdown_token.clone().cancelled_owned(),
    )
    .await;
    info!("HTTP server stopped: {:?}", result);
    shutdown_token.cancel();

    let timeout = Duration::from_secs(app_config.shutdown_timeout_secs);
    if !job_manager.shutdown(timeout).await {
        warn!("Exiting with jobs still running");
    }

    match metrics_server.await {
        Ok(Err(e)) => error!("Metrics server failed: {:?}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    result
}
