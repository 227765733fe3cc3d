mod file_config;

pub use file_config::{FileConfig, WebhookFileConfig};

use crate::engine::EngineFlags;
use crate::jobs::PoolSettings;
use crate::notifications::{WebhookSettings, DEFAULT_WEBHOOK_TIMEOUT_SECS};
use crate::server::{RequestsLoggingLevel, ServerConfig};
use crate::validation::PathValidator;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;

pub const DEFAULT_JOB_STORAGE_DIR: &str = "job-storage";
pub const DEFAULT_ANSIBLE_PLAYBOOK_BIN: &str = "ansible-playbook";
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub playbook_dir: Option<PathBuf>,
    pub inventory_dir: Option<PathBuf>,
    pub inventory_file: Option<PathBuf>,
    pub job_storage_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub ansible_playbook_bin: String,
    pub max_concurrent_jobs: usize,
    pub max_queued_jobs: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        let pool = PoolSettings::default();
        Self {
            playbook_dir: None,
            inventory_dir: None,
            inventory_file: None,
            job_storage_dir: None,
            host: server.host,
            port: server.port,
            metrics_port: server.metrics_port,
            logging_level: server.requests_logging_level,
            ansible_playbook_bin: DEFAULT_ANSIBLE_PLAYBOOK_BIN.to_string(),
            max_concurrent_jobs: pool.max_concurrent_jobs,
            max_queued_jobs: pool.max_queued_jobs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Filesystem layout
    pub playbook_dir: PathBuf,
    pub inventory_dir: PathBuf,
    pub inventory_file: PathBuf,
    pub job_storage_dir: PathBuf,
    pub ansible_playbook_bin: PathBuf,
    pub playbook_whitelist: Vec<String>,

    // Listeners and logging
    pub host: String,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    /// Default tracing directive, overridden by `LOG_LEVEL`.
    pub log_level: Option<String>,

    // Execution
    pub engine_flags: EngineFlags,
    pub pool: PoolSettings,
    pub shutdown_timeout_secs: u64,
    pub webhook: WebhookSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let playbook_dir = file
            .playbook_dir
            .map(PathBuf::from)
            .or_else(|| cli.playbook_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "playbook_dir must be specified via --playbook-dir or in config file"
                )
            })?;
        if !playbook_dir.exists() {
            bail!("Playbook directory does not exist: {:?}", playbook_dir);
        }
        if !playbook_dir.is_dir() {
            bail!("playbook_dir is not a directory: {:?}", playbook_dir);
        }

        let inventory_file = file
            .inventory_file
            .map(PathBuf::from)
            .or_else(|| cli.inventory_file.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "inventory_file must be specified via --inventory-file or in config file"
                )
            })?;

        let inventory_dir = file
            .inventory_dir
            .map(PathBuf::from)
            .or_else(|| cli.inventory_dir.clone())
            .or_else(|| inventory_file.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let job_storage_dir = file
            .job_storage_dir
            .map(PathBuf::from)
            .or_else(|| cli.job_storage_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_JOB_STORAGE_DIR));

        // Engine processes run inside per-job directories, so every path
        // handed to them must not depend on the working directory.
        let playbook_dir = absolute(playbook_dir)?;
        let inventory_dir = absolute(inventory_dir)?;
        let inventory_file = absolute(inventory_file)?;
        let job_storage_dir = absolute(job_storage_dir)?;

        let ansible_playbook_bin = PathBuf::from(
            file.ansible_playbook_bin
                .unwrap_or_else(|| cli.ansible_playbook_bin.clone()),
        );
        // A bare name is looked up in PATH
        let ansible_playbook_bin = if ansible_playbook_bin.components().count() > 1 {
            absolute(ansible_playbook_bin)?
        } else {
            ansible_playbook_bin
        };

        let playbook_whitelist = file.playbook_whitelist.unwrap_or_default();
        PathValidator::compile_whitelist(&playbook_whitelist)
            .context("Invalid pattern in playbook_whitelist")?;

        let host = file.host.unwrap_or_else(|| cli.host.clone());
        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());
        let log_level = file.log_level.map(|s| s.to_lowercase());

        let engine_flags = EngineFlags {
            suppress_output: file.suppress_ansible_output.unwrap_or(false),
            omit_event_data: file.omit_event_data.unwrap_or(false),
            only_failed_event_data: file.only_failed_event_data.unwrap_or(false),
        };

        let pool = PoolSettings {
            max_concurrent_jobs: file.max_concurrent_jobs.unwrap_or(cli.max_concurrent_jobs),
            max_queued_jobs: file.max_queued_jobs.unwrap_or(cli.max_queued_jobs),
        };
        if pool.max_concurrent_jobs < 1 {
            bail!("max_concurrent_jobs must be at least 1");
        }

        let shutdown_timeout_secs = file
            .shutdown_timeout_secs
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        let webhook_file = file.webhook.unwrap_or_default();
        let webhook = WebhookSettings {
            url: webhook_file.url.filter(|url| !url.trim().is_empty()),
            kind: webhook_file.kind.unwrap_or_default(),
            timeout_secs: webhook_file.timeout.unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS),
        };

        Ok(AppConfig {
            playbook_dir,
            inventory_dir,
            inventory_file,
            job_storage_dir,
            ansible_playbook_bin,
            playbook_whitelist,
            host,
            port,
            metrics_port,
            logging_level,
            log_level,
            engine_flags,
            pool,
            shutdown_timeout_secs,
            webhook,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            host: self.host.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
        }
    }

    pub fn path_validator(&self) -> Result<PathValidator> {
        let whitelist = PathValidator::compile_whitelist(&self.playbook_whitelist)
            .context("Invalid pattern in playbook_whitelist")?;
        Ok(PathValidator::new(
            &self.playbook_dir,
            &self.inventory_dir,
            &self.inventory_file,
            whitelist,
        ))
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    Ok(cwd.join(path))
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
