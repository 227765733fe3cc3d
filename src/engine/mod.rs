//! Contract with the external playbook execution engine.
//!
//! The job runner only knows about [`PlaybookEngine`]: hand it an
//! [`ExecutionRequest`], get back an exit classification, the captured
//! streams and per-host statistics.

mod ansible;
mod recap;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::job_store::JobOptions;

pub use ansible::AnsiblePlaybookEngine;
pub use recap::{parse_recap, parse_task_events, TaskEvent};

/// Process-wide output and event handling switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFlags {
    /// Do not echo engine output into the service log.
    pub suppress_output: bool,
    /// Record task events without their data.
    pub omit_event_data: bool,
    /// Only failed and unreachable task events keep their data.
    pub only_failed_event_data: bool,
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job_id: String,
    pub playbook: PathBuf,
    pub inventory: PathBuf,
    pub extra_vars: Map<String, Value>,
    pub options: JobOptions,
    /// Private directory for this job. The engine may write anything under it.
    pub work_dir: PathBuf,
    pub flags: EngineFlags,
}

/// Engine's own classification of a run that went to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Successful,
    Failed,
}

#[derive(Debug, Clone)]
pub struct EngineResult {
    pub status: EngineStatus,
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
    pub stats: Value,
    /// The exact invocation, shell-quoted.
    pub command: String,
    pub events: Vec<TaskEvent>,
}

/// The engine could not be prepared or invoked.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cmdline: {0}")]
    InvalidCmdline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Runs one playbook to completion.
///
/// Called from a blocking context using `spawn_blocking`.
pub trait PlaybookEngine: Send + Sync {
    fn run(&self, request: &ExecutionRequest) -> Result<EngineResult, EngineError>;
}
