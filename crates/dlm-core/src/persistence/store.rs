//! JSON-backed job index, written via the same write-temp-then-rename idiom
//! used for manifests and final output files.

use crate::model::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum JobsIndexError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("unknown job {0}")]
    UnknownJob(JobId),
}

/// One row of the index: enough to enumerate and resume on startup without
/// reparsing every job's manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub url: String,
    pub final_path: PathBuf,
    pub temp_dir: PathBuf,
    pub status: JobStatus,
    pub resumable: bool,
    pub created_at_unix: u64,
    pub updated_at_unix: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    jobs: HashMap<JobId, JobRecord>,
}

/// The global job index, one file (`jobs.json`) under the state directory.
/// Holds an in-memory mirror guarded by a lock and re-serializes the whole
/// file on every mutation — the teacher's SQLite table committed one
/// statement per call; this is the JSON equivalent of that granularity.
pub struct JobsIndex {
    path: PathBuf,
    inner: RwLock<IndexFile>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl JobsIndex {
    /// Opens (or creates) `jobs.json` under the given state directory.
    pub fn open(state_dir: &Path) -> Result<Self, JobsIndexError> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join("jobs.json");
        let inner = if path.exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            IndexFile::default()
        };
        let index = Self {
            path,
            inner: RwLock::new(inner),
        };
        index.persist()?;
        Ok(index)
    }

    pub fn open_default() -> Result<Self, JobsIndexError> {
        let state_dir = crate::config::state_dir()
            .map_err(|e| JobsIndexError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        Self::open(&state_dir)
    }

    fn persist(&self) -> Result<(), JobsIndexError> {
        let inner = self.inner.read().unwrap();
        let json = serde_json::to_string_pretty(&*inner)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn add_job(&self, id: JobId, url: String, final_path: PathBuf, temp_dir: PathBuf) -> Result<(), JobsIndexError> {
        let now = now_unix();
        let record = JobRecord {
            id: id.clone(),
            url,
            final_path,
            temp_dir,
            status: JobStatus::Pending,
            resumable: false,
            created_at_unix: now,
            updated_at_unix: now,
        };
        self.inner.write().unwrap().jobs.insert(id, record);
        self.persist()
    }

    pub fn list_jobs(&self) -> Vec<JobRecord> {
        self.inner.read().unwrap().jobs.values().cloned().collect()
    }

    pub fn get_job(&self, id: &JobId) -> Option<JobRecord> {
        self.inner.read().unwrap().jobs.get(id).cloned()
    }

    pub fn update_metadata(&self, id: &JobId, resumable: bool) -> Result<(), JobsIndexError> {
        {
            let mut inner = self.inner.write().unwrap();
            let record = inner
                .jobs
                .get_mut(id)
                .ok_or_else(|| JobsIndexError::UnknownJob(id.clone()))?;
            record.resumable = resumable;
            record.updated_at_unix = now_unix();
        }
        self.persist()
    }

    pub fn set_state(&self, id: &JobId, status: JobStatus) -> Result<(), JobsIndexError> {
        {
            let mut inner = self.inner.write().unwrap();
            let record = inner
                .jobs
                .get_mut(id)
                .ok_or_else(|| JobsIndexError::UnknownJob(id.clone()))?;
            record.status = status;
            record.updated_at_unix = now_unix();
        }
        self.persist()
    }

    pub fn remove_job(&self, id: &JobId) -> Result<(), JobsIndexError> {
        self.inner.write().unwrap().jobs.remove(id);
        self.persist()
    }

    /// Startup recovery (§4.9): every job left in a non-terminal, non-queued
    /// state by an unclean shutdown goes back to `Queued` if its manifest
    /// says it's resumable, else to `Error`. Returns how many were touched.
    pub fn recover_running_jobs(&self) -> Result<u64, JobsIndexError> {
        let ids_to_fix: Vec<(JobId, bool)> = {
            let inner = self.inner.read().unwrap();
            inner
                .jobs
                .values()
                .filter(|r| {
                    matches!(
                        r.status,
                        JobStatus::Running | JobStatus::Probing | JobStatus::Merging | JobStatus::Refreshing
                    )
                })
                .map(|r| (r.id.clone(), r.resumable))
                .collect()
        };

        let touched = ids_to_fix.len() as u64;
        for (id, resumable) in ids_to_fix {
            let next = if resumable { JobStatus::Queued } else { JobStatus::Error };
            self.set_state(&id, next)?;
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_list_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let index = JobsIndex::open(dir.path()).unwrap();
        index
            .add_job("j1".into(), "https://x/y".into(), PathBuf::from("/tmp/y"), PathBuf::from("/tmp/.y.dlm"))
            .unwrap();

        let reopened = JobsIndex::open(dir.path()).unwrap();
        let jobs = reopened.list_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "j1");
        assert_eq!(jobs[0].status, JobStatus::Pending);
    }

    #[test]
    fn set_state_persists_and_is_visible_to_get_job() {
        let dir = tempfile::tempdir().unwrap();
        let index = JobsIndex::open(dir.path()).unwrap();
        index
            .add_job("j1".into(), "u".into(), PathBuf::from("/tmp/f"), PathBuf::from("/tmp/.f.dlm"))
            .unwrap();
        index.set_state(&"j1".to_string(), JobStatus::Running).unwrap();
        assert_eq!(index.get_job(&"j1".to_string()).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn recover_running_jobs_requeues_resumable_and_errors_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let index = JobsIndex::open(dir.path()).unwrap();
        index
            .add_job("resumable".into(), "u".into(), PathBuf::from("/tmp/a"), PathBuf::from("/tmp/.a.dlm"))
            .unwrap();
        index
            .add_job("stuck".into(), "u".into(), PathBuf::from("/tmp/b"), PathBuf::from("/tmp/.b.dlm"))
            .unwrap();
        index.set_state(&"resumable".to_string(), JobStatus::Running).unwrap();
        index.update_metadata(&"resumable".to_string(), true).unwrap();
        index.set_state(&"stuck".to_string(), JobStatus::Running).unwrap();
        index.update_metadata(&"stuck".to_string(), false).unwrap();

        let touched = index.recover_running_jobs().unwrap();
        assert_eq!(touched, 2);
        assert_eq!(index.get_job(&"resumable".to_string()).unwrap().status, JobStatus::Queued);
        assert_eq!(index.get_job(&"stuck".to_string()).unwrap().status, JobStatus::Error);
    }

    #[test]
    fn remove_job_drops_it_from_subsequent_listings() {
        let dir = tempfile::tempdir().unwrap();
        let index = JobsIndex::open(dir.path()).unwrap();
        index
            .add_job("j1".into(), "u".into(), PathBuf::from("/tmp/f"), PathBuf::from("/tmp/.f.dlm"))
            .unwrap();
        index.remove_job(&"j1".to_string()).unwrap();
        assert!(index.list_jobs().is_empty());
    }
}
