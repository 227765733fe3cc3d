//! Job lifecycle: admission, dispatch and execution.

mod manager;
pub(crate) mod runner;

pub use manager::{JobManager, PoolSettings, RecoveryReport, SubmitError, INTERRUPTED_MESSAGE};
pub use runner::{JobRunner, RunnerSettings};
