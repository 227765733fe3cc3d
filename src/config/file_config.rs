use crate::notifications::WebhookKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FileConfig {
    // Directories and files; relative values are taken from the config file's directory
    pub playbook_dir: Option<String>,
    pub inventory_dir: Option<String>,
    pub inventory_file: Option<String>,
    pub job_storage_dir: Option<String>,
    pub ansible_playbook_bin: Option<String>,

    pub playbook_whitelist: Option<Vec<String>>,

    // Listeners
    pub host: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,

    // Logging
    pub logging_level: Option<String>,
    pub log_level: Option<String>,

    // Engine output handling
    pub suppress_ansible_output: Option<bool>,
    pub omit_event_data: Option<bool>,
    pub only_failed_event_data: Option<bool>,

    // Worker pool
    pub max_concurrent_jobs: Option<usize>,
    pub max_queued_jobs: Option<usize>,
    pub shutdown_timeout_secs: Option<u64>,

    pub webhook: Option<WebhookFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WebhookFileConfig {
    pub url: Option<String>,
    /// Unknown types fall back to the generic payload.
    #[serde(rename = "type")]
    pub kind: Option<WebhookKind>,
    pub timeout: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let mut config: FileConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        Ok(config)
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        for value in [
            &mut self.playbook_dir,
            &mut self.inventory_dir,
            &mut self.inventory_file,
            &mut self.job_storage_dir,
        ]
        .into_iter()
        .flatten()
        {
            let path = PathBuf::from(value.as_str());
            if path.is_relative() {
                *value = base.join(path).to_string_lossy().to_string();
            }
        }
    }
}
