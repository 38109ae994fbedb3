use super::{JobId, MediaInfo, Segment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

/// Input accepted by `submit` (§6 control surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSpec {
    pub url: String,
    pub folder: PathBuf,
    pub filename: Option<String>,
    pub connections: Option<usize>,
    pub headers: HashMap<String, String>,
    pub proxy: Option<String>,
    pub cookies: HashMap<String, String>,
    pub speed_limit_bytes: Option<u64>,
}

/// Job lifecycle states (§4.5). Only the scheduler transitions `status`;
/// workers only ever touch their own segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Probing,
    Queued,
    Running,
    Paused,
    Merging,
    Refreshing,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled)
    }
}

/// The aggregate state for one download request (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub schema_version: u32,

    // Inputs
    pub url: String,
    pub referer: Option<String>,
    pub headers: HashMap<String, String>,
    pub proxy: Option<String>,
    pub cookies: HashMap<String, String>,

    // Discovered (via Probe)
    pub total_size: Option<u64>,
    pub resumable: bool,
    pub effective_url: String,
    pub server_filename: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,

    // Target
    pub final_path: PathBuf,
    pub temp_dir: PathBuf,

    // Policy
    pub max_connections: usize,
    pub segment_size_hint: u64,
    pub speed_limit_bytes: Option<u64>,

    // Runtime
    pub status: JobStatus,
    pub downloaded_bytes: u64,
    pub rate_ewma_bps: f64,
    pub last_error: Option<(crate::error::ErrorKind, Option<u32>, String)>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,

    pub segments: Vec<Segment>,

    pub media: Option<MediaInfo>,
    /// Child job ids spawned for a separate audio track or subtitles
    /// (§4.8 step 4/6).
    pub child_job_ids: Vec<JobId>,

    /// How many times this job has been re-admitted after a transient
    /// failure, for the 3-per-hour cap (§4.9 failure escalation).
    pub readmission_count: u32,
    pub readmission_window_start: Option<SystemTime>,
}

impl Job {
    pub fn downloaded_from_segments(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes_written).sum()
    }

    pub fn all_segments_done(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| s.is_done())
    }

    pub fn eta_seconds(&self) -> Option<f64> {
        let total = self.total_size?;
        if self.rate_ewma_bps <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.downloaded_bytes) as f64;
        Some(remaining / self.rate_ewma_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_job() -> Job {
        Job {
            id: "j1".into(),
            schema_version: 1,
            url: "https://example.com/f".into(),
            referer: None,
            headers: HashMap::new(),
            proxy: None,
            cookies: HashMap::new(),
            total_size: Some(1000),
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
            status: JobStatus::Running,
            downloaded_bytes: 0,
            rate_ewma_bps: 0.0,
            last_error: None,
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
            segments: vec![],
            media: None,
            child_job_ids: vec![],
            readmission_count: 0,
            readmission_window_start: None,
        }
    }

    #[test]
    fn all_segments_done_is_false_when_empty() {
        assert!(!blank_job().all_segments_done());
    }

    #[test]
    fn eta_is_none_without_rate() {
        assert_eq!(blank_job().eta_seconds(), None);
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
