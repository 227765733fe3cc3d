//! Shared constants for end-to-end tests

// ============================================================================
// Playbooks
// ============================================================================

/// Playbook the fake engine runs successfully
pub const PLAYBOOK_OK: &str = "site.yml";

/// Playbook the fake engine reports as failed
pub const PLAYBOOK_FAILING: &str = "failing.yml";

/// Playbook in a subdirectory, with the alternate extension
pub const PLAYBOOK_NESTED: &str = "roles/deploy.yaml";

/// File in the playbook directory that is not a playbook
pub const NOT_A_PLAYBOOK: &str = "README.md";

/// Inventory file, relative to the inventory directory
pub const INVENTORY_STAGING: &str = "staging";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness checks (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// HTTP request timeout for test clients (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum time to wait for a job to reach a terminal state (milliseconds)
pub const JOB_TIMEOUT_MS: u64 = 10_000;

/// Interval between job status polls (milliseconds)
pub const JOB_POLL_INTERVAL_MS: u64 = 50;
