//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per endpoint. When API routes or request
//! formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

const API_PREFIX: &str = "/api/v1/ansible";

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Service Endpoints
    // ========================================================================

    pub async fn get_home(&self) -> Response {
        self.get("/").await
    }

    pub async fn get_health(&self) -> Response {
        self.get("/health").await
    }

    pub async fn get_version(&self) -> Response {
        self.get("/version").await
    }

    // ========================================================================
    // Job Endpoints
    // ========================================================================

    /// Submits `playbook` with no other fields.
    pub async fn submit_playbook(&self, playbook: &str) -> Response {
        self.submit(&json!({ "playbook": playbook })).await
    }

    pub async fn submit(&self, body: &Value) -> Response {
        self.client
            .post(format!("{}{}/playbook", self.base_url, API_PREFIX))
            .json(body)
            .send()
            .await
            .expect("Submit request failed")
    }

    /// Posts a raw body, for malformed JSON cases.
    pub async fn submit_raw(&self, body: &str) -> Response {
        self.client
            .post(format!("{}{}/playbook", self.base_url, API_PREFIX))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("Submit request failed")
    }

    pub async fn get_job(&self, job_id: &str) -> Response {
        self.get(&format!("{}/job/{}", API_PREFIX, job_id)).await
    }

    pub async fn list_jobs(&self) -> Response {
        self.get(&format!("{}/jobs", API_PREFIX)).await
    }

    pub async fn get_available_playbooks(&self) -> Response {
        self.get(&format!("{}/available-playbooks", API_PREFIX))
            .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Submits a job and returns its id, asserting acceptance.
    pub async fn submit_and_get_id(&self, body: &Value) -> String {
        let response = self.submit(body).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::ACCEPTED,
            "Submission was not accepted"
        );
        let body: Value = response.json().await.expect("Invalid submit response");
        body["job_id"]
            .as_str()
            .expect("Missing job_id")
            .to_string()
    }

    /// Polls a job until it reaches a terminal status and returns the record.
    ///
    /// # Panics
    ///
    /// Panics if the job is still running after [`JOB_TIMEOUT_MS`].
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        let start = std::time::Instant::now();
        loop {
            let response = self.get_job(job_id).await;
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let job: Value = response.json().await.expect("Invalid job record");
            match job["status"].as_str() {
                Some("completed") | Some("failed") | Some("error") => return job,
                _ => {}
            }
            if start.elapsed() > Duration::from_millis(JOB_TIMEOUT_MS) {
                panic!("Job {} did not finish within {}ms", job_id, JOB_TIMEOUT_MS);
            }
            tokio::time::sleep(Duration::from_millis(JOB_POLL_INTERVAL_MS)).await;
        }
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("GET request failed")
    }
}
