//! File-backed job store.
//!
//! Each job is one pretty-printed JSON document at `<dir>/<id>.json`.
//! Writes go to `<id>.json.tmp` and are renamed into place, so a crash
//! mid-write never leaves a truncated record behind.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use super::models::{Job, JobSummary};
use super::trait_def::{check_mutation, JobStore, JobStoreError};

const RECORD_EXTENSION: &str = "json";

pub struct FileJobStore {
    dir: PathBuf,
    /// One lock per job id while some writer holds it; writers of
    /// different jobs never contend.
    record_locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl FileJobStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, JobStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            record_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    fn record_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .record_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        locks.insert(id.to_string(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        let mut locks = self
            .record_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| lock.strong_count() > 0);
        locks.len()
    }

    fn read_record(&self, id: &str) -> Result<Job, JobStoreError> {
        let content = match fs::read_to_string(self.record_path(id)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(JobStoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    fn write_record(&self, job: &Job) -> Result<(), JobStoreError> {
        let json = serde_json::to_string_pretty(job)?;
        let final_path = self.record_path(&job.id);
        let temp_path = final_path.with_extension(format!("{}.tmp", RECORD_EXTENSION));

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &final_path)?;
        Ok(())
    }
}

/// Job ids double as file names, so only a conservative alphabet is accepted.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl JobStore for FileJobStore {
    fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        if !is_valid_id(&job.id) {
            return Err(JobStoreError::InvalidId(job.id.clone()));
        }

        let lock = self.record_lock(&job.id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.record_path(&job.id).exists() {
            return Err(JobStoreError::Conflict(job.id.clone()));
        }

        self.write_record(job)?;
        debug!("Created job record {}", job.id);
        Ok(())
    }

    fn update(&self, id: &str, mutator: &mut dyn FnMut(&mut Job)) -> Result<Job, JobStoreError> {
        if !is_valid_id(id) {
            return Err(JobStoreError::NotFound(id.to_string()));
        }

        let lock = self.record_lock(id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = self.read_record(id)?;
        let mut after = before.clone();
        mutator(&mut after);
        check_mutation(&before, &after)?;

        self.write_record(&after)?;
        debug!("Updated job record {} ({})", id, after.status);
        Ok(after)
    }

    fn get(&self, id: &str) -> Result<Job, JobStoreError> {
        if !is_valid_id(id) {
            return Err(JobStoreError::NotFound(id.to_string()));
        }
        self.read_record(id)
    }

    fn list(&self) -> Result<BTreeMap<String, JobSummary>, JobStoreError> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .map(|job| (job.id.clone(), job.summary()))
            .collect())
    }

    fn list_jobs(&self) -> Result<Vec<Job>, JobStoreError> {
        let mut jobs = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }

            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping unreadable job record {:?}: {}", path, e);
                    continue;
                }
            };
            match serde_json::from_str::<Job>(&content) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping corrupt job record {:?}: {}", path, e),
            }
        }

        jobs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }
}
