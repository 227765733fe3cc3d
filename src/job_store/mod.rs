//! Durable job records.
//!
//! The store is the only state shared between job workers; everything else
//! a worker touches is owned by that worker until the terminal write.

mod file_store;
mod models;
mod trait_def;

pub use file_store::FileJobStore;
pub use models::{Job, JobOptions, JobStatus, JobSummary, DEFAULT_FORKS};
pub use trait_def::{JobStore, JobStoreError};
