//! ansible-link: run Ansible playbooks as tracked background jobs over HTTP.

pub mod config;
pub mod engine;
pub mod job_store;
pub mod jobs;
pub mod notifications;
pub mod server;
pub mod validation;
