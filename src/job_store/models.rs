//! Job record models.
//!
//! A [`Job`] is the durable document describing one playbook execution
//! request and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Default number of parallel engine processes for a job.
pub const DEFAULT_FORKS: u32 = 5;

/// Lifecycle status of a job.
///
/// Transitions follow `pending -> running -> {completed | failed | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed, // terminal
    Failed,    // terminal
    Error,     // terminal
}

impl JobStatus {
    /// Returns true if no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Error
        )
    }

    /// Check if moving from this status to `target` is a legal edge.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        matches!(
            (self, target),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution options forwarded to the engine. Immutable once the job exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub forks: u32,
    pub verbosity: u8,
    pub limit: Option<String>,
    pub tags: Option<Vec<String>>,
    pub skip_tags: Option<Vec<String>>,
    pub cmdline: Option<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            forks: DEFAULT_FORKS,
            verbosity: 0,
            limit: None,
            tags: None,
            skip_tags: None,
            cmdline: None,
        }
    }
}

/// The durable job document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub playbook_path: PathBuf,
    pub inventory_path: PathBuf,
    #[serde(default)]
    pub vars: Map<String, Value>,
    #[serde(flatten)]
    pub options: JobOptions,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub stats: Option<Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub ansible_cli_command: Option<String>,
}

impl Job {
    /// Create a new job record in `pending` status.
    pub fn new(
        id: String,
        playbook_path: PathBuf,
        inventory_path: PathBuf,
        vars: Map<String, Value>,
        options: JobOptions,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            playbook_path,
            inventory_path,
            vars,
            options,
            start_time: Utc::now(),
            end_time: None,
            stdout: None,
            stderr: None,
            stats: None,
            errors: Vec::new(),
            ansible_cli_command: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Playbook path as used for metric labels and notifications.
    pub fn playbook_label(&self) -> String {
        self.playbook_path.display().to_string()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            status: self.status,
            playbook: self.playbook_label(),
        }
    }
}

/// Entry of the job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub status: JobStatus,
    pub playbook: String,
}
