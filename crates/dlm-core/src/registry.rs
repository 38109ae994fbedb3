//! In-memory job registry: the single owner of live `Job` state (§9 design
//! note: break the `Job <-> Segment <-> Worker` reference cycle by having
//! workers hold only `job_id` + segment index and resolve through here
//! rather than an `Arc<Mutex<Job>>` threaded through every layer).

use crate::error::{DlmError, Result};
use crate::model::{Job, JobId, JobStatus, Segment};
use std::collections::HashMap;
use std::sync::RwLock;

/// Owns every in-memory `Job`. `Brain` is the only writer of job-level
/// fields (status, segments); workers report outcomes back by `job_id` and
/// segment index instead of holding a reference into a job.
#[derive(Default)]
pub struct Registry {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        self.jobs.write().unwrap().insert(job.id.clone(), job);
    }

    pub fn remove(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.write().unwrap().remove(job_id)
    }

    pub fn get_clone(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.read().unwrap().get(job_id).cloned()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.read().unwrap().contains_key(job_id)
    }

    pub fn all_ids(&self) -> Vec<JobId> {
        self.jobs.read().unwrap().keys().cloned().collect()
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.read().unwrap().values().cloned().collect()
    }

    pub fn set_status(&self, job_id: &JobId, status: JobStatus) -> Result<JobStatus> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| DlmError::Internal(format!("unknown job {job_id}")))?;
        let old = crate::job::transition(&mut job.status, status)
            .map_err(|e| DlmError::Internal(e.to_string()))?;
        Ok(old)
    }

    /// Applies a segment outcome (new bytes_written/state/attempts) by index,
    /// without handing the caller a live reference into the job.
    pub fn update_segment<F>(&self, job_id: &JobId, index: usize, f: F) -> Result<()>
    where
        F: FnOnce(&mut Segment),
    {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| DlmError::Internal(format!("unknown job {job_id}")))?;
        let seg = job
            .segments
            .get_mut(index)
            .ok_or_else(|| DlmError::Internal(format!("unknown segment {index} for job {job_id}")))?;
        f(seg);
        job.downloaded_bytes = job.downloaded_from_segments();
        job.updated_at = std::time::SystemTime::now();
        Ok(())
    }

    pub fn mutate<F, R>(&self, job_id: &JobId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Job) -> R,
    {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| DlmError::Internal(format!("unknown job {job_id}")))?;
        Ok(f(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SegmentState;
    use std::collections::HashMap as Map;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn blank_job(id: &str) -> Job {
        Job {
            id: id.into(),
            schema_version: 1,
            url: "https://example.com/f".into(),
            referer: None,
            headers: Map::new(),
            proxy: None,
            cookies: Map::new(),
            total_size: Some(100),
            resumable: true,
            effective_url: "https://example.com/f".into(),
            server_filename: None,
            content_type: None,
            etag: None,
            last_modified: None,
            final_path: PathBuf::from("/tmp/f"),
            temp_dir: PathBuf::from("/tmp/.f.dlm"),
            max_connections: 4,
            segment_size_hint: 1 << 20,
            speed_limit_bytes: None,
            status: JobStatus::Queued,
            downloaded_bytes: 0,
            rate_ewma_bps: 0.0,
            last_error: None,
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
            segments: vec![Segment::new_range(0, 0, 100)],
            media: None,
            child_job_ids: vec![],
            readmission_count: 0,
            readmission_window_start: None,
        }
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let reg = Registry::new();
        reg.insert(blank_job("j1"));
        assert!(reg.contains(&"j1".to_string()));
        assert_eq!(reg.get_clone(&"j1".to_string()).unwrap().status, JobStatus::Queued);
        reg.remove(&"j1".to_string());
        assert!(!reg.contains(&"j1".to_string()));
    }

    #[test]
    fn set_status_runs_through_the_transition_table() {
        let reg = Registry::new();
        reg.insert(blank_job("j1"));
        let old = reg.set_status(&"j1".to_string(), JobStatus::Running).unwrap();
        assert_eq!(old, JobStatus::Queued);
        assert_eq!(reg.get_clone(&"j1".to_string()).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn set_status_rejects_illegal_transition() {
        let reg = Registry::new();
        reg.insert(blank_job("j1"));
        assert!(reg.set_status(&"j1".to_string(), JobStatus::Completed).is_err());
        assert_eq!(reg.get_clone(&"j1".to_string()).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn update_segment_recomputes_downloaded_bytes() {
        let reg = Registry::new();
        reg.insert(blank_job("j1"));
        reg.update_segment(&"j1".to_string(), 0, |seg| {
            seg.bytes_written = 100;
            seg.state = SegmentState::Done;
        })
        .unwrap();
        assert_eq!(reg.get_clone(&"j1".to_string()).unwrap().downloaded_bytes, 100);
    }
}
