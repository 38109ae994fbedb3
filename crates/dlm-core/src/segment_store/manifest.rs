//! On-disk manifest.json shape and atomic persistence (§4.2, §6).

use crate::error::{DlmError, Result};
use crate::model::{Job, JobId, JobStatus, MediaInfo, Segment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Current manifest schema version. Increment whenever the on-disk shape
/// changes in a way old readers can't tolerate.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestSegment {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub bytes_written: u64,
    pub state: crate::model::SegmentState,
    pub source_url: Option<String>,
    pub iv: Option<[u8; 16]>,
}

impl From<&Segment> for ManifestSegment {
    fn from(s: &Segment) -> Self {
        Self {
            index: s.index,
            start: s.start,
            end: s.end,
            bytes_written: s.bytes_written,
            state: s.state,
            source_url: s.source_url.clone(),
            iv: s.iv,
        }
    }
}

impl From<ManifestSegment> for Segment {
    fn from(m: ManifestSegment) -> Self {
        Segment {
            index: m.index,
            start: m.start,
            end: m.end,
            state: m.state,
            bytes_written: m.bytes_written,
            attempts: 0,
            source_url: m.source_url,
            decrypt_key: None,
            iv: m.iv,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub job_id: JobId,
    pub url: String,
    pub effective_url: String,
    pub headers: HashMap<String, String>,
    pub total_size: Option<u64>,
    pub resumable: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub final_path: PathBuf,
    pub status: JobStatus,
    pub segments: Vec<ManifestSegment>,
    pub media: Option<MediaInfo>,
}

impl Manifest {
    pub fn from_job(job: &Job) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            job_id: job.id.clone(),
            url: job.url.clone(),
            effective_url: job.effective_url.clone(),
            headers: job.headers.clone(),
            total_size: job.total_size,
            resumable: job.resumable,
            etag: job.etag.clone(),
            last_modified: job.last_modified.clone(),
            final_path: job.final_path.clone(),
            status: job.status,
            segments: job.segments.iter().map(ManifestSegment::from).collect(),
            media: job.media.clone(),
        }
    }
}

fn manifest_path(temp_dir: &Path) -> PathBuf {
    temp_dir.join("manifest.json")
}

/// Atomic write-via-temp-file-then-rename, the crate's idiom for crash-safe
/// writes (used elsewhere for the final-file rename in `finalize`).
pub fn persist_manifest(temp_dir: &Path, manifest: &Manifest) -> Result<()> {
    fs::create_dir_all(temp_dir)?;
    let final_path = manifest_path(temp_dir);
    let tmp_path = temp_dir.join("manifest.json.tmp");
    let data = serde_json::to_vec_pretty(manifest)?;
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Load a manifest. Segment progress comes from `bytes_written` as persisted
/// in the manifest itself, not from the part file's on-disk size: every part
/// file is preallocated to its full range length at open time (§2.2), so its
/// size reflects the reserved range rather than bytes actually written. The
/// on-disk size is only consulted to catch a genuinely corrupt part (bigger
/// than its segment's range can ever legitimately be) or a missing one, and
/// as a downward clamp if a part is somehow smaller than what was recorded.
pub fn load_manifest(temp_dir: &Path) -> Result<Manifest> {
    let path = manifest_path(temp_dir);
    let data = fs::read(&path)
        .map_err(|e| DlmError::ManifestCorrupt(format!("{}: {e}", path.display())))?;
    let mut manifest: Manifest = serde_json::from_slice(&data)
        .map_err(|e| DlmError::ManifestCorrupt(format!("{}: {e}", path.display())))?;

    if manifest.schema_version > SCHEMA_VERSION {
        return Err(DlmError::SchemaFuture {
            found: manifest.schema_version,
            supported: SCHEMA_VERSION,
        });
    }

    for seg in &mut manifest.segments {
        let part_path = temp_dir.join(format!("part-{:06}", seg.index));
        let range_len = seg.end.saturating_sub(seg.start);

        let on_disk = match fs::metadata(&part_path) {
            Ok(m) => m.len(),
            Err(_) => {
                seg.bytes_written = 0;
                seg.state = crate::model::SegmentState::Idle;
                continue;
            }
        };

        if range_len > 0 && on_disk > range_len {
            // Corrupt: a preallocated part can never legitimately exceed its
            // segment's range.
            let _ = fs::remove_file(&part_path);
            seg.bytes_written = 0;
            seg.state = crate::model::SegmentState::Idle;
            continue;
        }

        // The persisted `bytes_written` is the authoritative resume point.
        // Clamp it against the on-disk size, which can legitimately be ahead
        // of it (preallocation) but should never be behind it.
        if on_disk < seg.bytes_written {
            seg.bytes_written = on_disk;
        }
        if range_len > 0 {
            seg.bytes_written = seg.bytes_written.min(range_len);
        }

        if seg.bytes_written == 0 {
            seg.state = crate::model::SegmentState::Idle;
        } else if range_len > 0 && seg.bytes_written == range_len {
            seg.state = crate::model::SegmentState::Done;
        } else if range_len == 0 && seg.state == crate::model::SegmentState::Done {
            // fragment-addressed segment, already reported complete
        } else {
            seg.state = crate::model::SegmentState::Idle;
        }
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest {
            schema_version: SCHEMA_VERSION,
            job_id: "j1".into(),
            url: "https://example.com/f".into(),
            effective_url: "https://example.com/f".into(),
            headers: HashMap::new(),
            total_size: Some(10),
            resumable: true,
            etag: Some("abc".into()),
            last_modified: None,
            final_path: PathBuf::from("/tmp/f"),
            status: JobStatus::Running,
            segments: vec![ManifestSegment {
                index: 0,
                start: 0,
                end: 10,
                bytes_written: 0,
                state: crate::model::SegmentState::Idle,
                source_url: None,
                iv: None,
            }],
            media: None,
        };
        persist_manifest(dir.path(), &manifest).unwrap();
        let loaded = load_manifest(dir.path()).unwrap();
        assert_eq!(loaded.job_id, "j1");
        assert_eq!(loaded.segments.len(), 1);
    }

    #[test]
    fn future_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest {
            schema_version: SCHEMA_VERSION + 1,
            job_id: "j1".into(),
            url: "u".into(),
            effective_url: "u".into(),
            headers: HashMap::new(),
            total_size: None,
            resumable: false,
            etag: None,
            last_modified: None,
            final_path: PathBuf::from("/tmp/f"),
            status: JobStatus::Running,
            segments: vec![],
            media: None,
        };
        persist_manifest(dir.path(), &manifest).unwrap();
        let err = load_manifest(dir.path()).unwrap_err();
        assert!(matches!(err, DlmError::SchemaFuture { .. }));
    }

    #[test]
    fn oversized_part_file_is_discarded_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest {
            schema_version: SCHEMA_VERSION,
            job_id: "j1".into(),
            url: "u".into(),
            effective_url: "u".into(),
            headers: HashMap::new(),
            total_size: Some(10),
            resumable: true,
            etag: None,
            last_modified: None,
            final_path: PathBuf::from("/tmp/f"),
            status: JobStatus::Running,
            segments: vec![ManifestSegment {
                index: 0,
                start: 0,
                end: 10,
                bytes_written: 0,
                state: crate::model::SegmentState::Idle,
                source_url: None,
                iv: None,
            }],
            media: None,
        };
        persist_manifest(dir.path(), &manifest).unwrap();
        fs::write(dir.path().join("part-000000"), vec![0u8; 20]).unwrap();
        let loaded = load_manifest(dir.path()).unwrap();
        assert_eq!(loaded.segments[0].bytes_written, 0);
        assert!(!dir.path().join("part-000000").exists());
    }

    #[test]
    fn preallocated_part_file_does_not_mask_partial_progress() {
        // The part file is preallocated to the full range length on open, so
        // its on-disk size alone can't tell a half-finished segment from a
        // finished one. The manifest's own `bytes_written` must win.
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest {
            schema_version: SCHEMA_VERSION,
            job_id: "j1".into(),
            url: "u".into(),
            effective_url: "u".into(),
            headers: HashMap::new(),
            total_size: Some(10),
            resumable: true,
            etag: None,
            last_modified: None,
            final_path: PathBuf::from("/tmp/f"),
            status: JobStatus::Running,
            segments: vec![ManifestSegment {
                index: 0,
                start: 0,
                end: 10,
                bytes_written: 5,
                state: crate::model::SegmentState::Downloading,
                source_url: None,
                iv: None,
            }],
            media: None,
        };
        persist_manifest(dir.path(), &manifest).unwrap();
        // Full-size part file on disk (preallocated), even though only half
        // of it was ever actually written.
        fs::write(dir.path().join("part-000000"), vec![0u8; 10]).unwrap();

        let loaded = load_manifest(dir.path()).unwrap();
        assert_eq!(loaded.segments[0].bytes_written, 5);
        assert_ne!(loaded.segments[0].state, crate::model::SegmentState::Done);
    }

    #[test]
    fn missing_part_file_resets_progress_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest {
            schema_version: SCHEMA_VERSION,
            job_id: "j1".into(),
            url: "u".into(),
            effective_url: "u".into(),
            headers: HashMap::new(),
            total_size: Some(10),
            resumable: true,
            etag: None,
            last_modified: None,
            final_path: PathBuf::from("/tmp/f"),
            status: JobStatus::Running,
            segments: vec![ManifestSegment {
                index: 0,
                start: 0,
                end: 10,
                bytes_written: 5,
                state: crate::model::SegmentState::Downloading,
                source_url: None,
                iv: None,
            }],
            media: None,
        };
        persist_manifest(dir.path(), &manifest).unwrap();
        let loaded = load_manifest(dir.path()).unwrap();
        assert_eq!(loaded.segments[0].bytes_written, 0);
        assert_eq!(loaded.segments[0].state, crate::model::SegmentState::Idle);
    }
}
