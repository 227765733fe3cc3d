use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::jobs::JobManager;

use super::ServerConfig;

pub type GuardedJobManager = Arc<JobManager>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub job_manager: GuardedJobManager,
}

impl ServerState {
    pub fn new(config: ServerConfig, job_manager: GuardedJobManager) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            job_manager,
        }
    }
}

impl FromRef<ServerState> for GuardedJobManager {
    fn from_ref(input: &ServerState) -> Self {
        input.job_manager.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
