//! JobStore trait definition.

use std::collections::BTreeMap;

use thiserror::Error;

use super::models::{Job, JobStatus, JobSummary};

/// Errors returned by job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job {0} already exists")]
    Conflict(String),

    #[error("Invalid job id: {0:?}")]
    InvalidId(String),

    #[error("Invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {0} cannot be modified: identity fields are immutable")]
    ImmutableField(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Keyed durable store for job documents.
///
/// Implementations guarantee that a record is visible to `get`/`list` as soon
/// as `create`/`update` returns, and that `update` is a read-modify-write
/// performed under per-record exclusion.
pub trait JobStore: Send + Sync {
    /// Persist a new record. Fails with `Conflict` if the id is taken.
    fn create(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Apply `mutator` to the stored record and persist the result.
    ///
    /// Returns the updated record. Status changes must follow the legal
    /// transition edges; identity fields cannot be changed.
    fn update(&self, id: &str, mutator: &mut dyn FnMut(&mut Job)) -> Result<Job, JobStoreError>;

    /// Point read of a single record.
    fn get(&self, id: &str) -> Result<Job, JobStoreError>;

    /// Full scan returning a summary per job id.
    fn list(&self) -> Result<BTreeMap<String, JobSummary>, JobStoreError>;

    /// Full scan returning complete records.
    fn list_jobs(&self) -> Result<Vec<Job>, JobStoreError>;
}

/// Validate that `after` is an acceptable successor of `before`.
pub(crate) fn check_mutation(before: &Job, after: &Job) -> Result<(), JobStoreError> {
    if before.id != after.id
        || before.playbook_path != after.playbook_path
        || before.inventory_path != after.inventory_path
        || before.vars != after.vars
        || before.options != after.options
    {
        return Err(JobStoreError::ImmutableField(before.id.clone()));
    }

    if before.status != after.status && !before.status.can_transition_to(after.status) {
        return Err(JobStoreError::InvalidTransition {
            id: before.id.clone(),
            from: before.status,
            to: after.status,
        });
    }

    // Terminal records are frozen.
    if before.is_terminal() && before != after {
        return Err(JobStoreError::InvalidTransition {
            id: before.id.clone(),
            from: before.status,
            to: after.status,
        });
    }

    Ok(())
}
