//! C2 SegmentStore: on-disk layout of part files per job, atomic
//! finalization, and crash-safe resume metadata (§4.2).

mod manifest;
mod part_file;

pub use manifest::{load_manifest, persist_manifest, Manifest, ManifestSegment, SCHEMA_VERSION};
pub use part_file::PartFile;

use crate::error::{DlmError, Result};
use crate::model::Job;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// A writable handle onto one segment's part file, returned by
/// `open_segment`. Wraps [`PartFile`] with the append-from offset the spec
/// names explicitly.
pub struct SinkHandle {
    part: PartFile,
    next_offset: u64,
}

impl SinkHandle {
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.part.write_at(self.next_offset, data)?;
        self.next_offset += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.next_offset
    }
}

pub struct SegmentStore;

impl SegmentStore {
    /// `open_segment(seg, append_from=bytes_written) -> SinkHandle`.
    pub fn open_segment(temp_dir: &Path, index: usize, range_len: u64, append_from: u64) -> Result<SinkHandle> {
        let part = PartFile::open(temp_dir, index, range_len)?;
        Ok(SinkHandle {
            part,
            next_offset: append_from,
        })
    }

    pub fn flush_and_close(handle: SinkHandle) -> Result<()> {
        handle.part.sync()?;
        Ok(())
    }

    pub fn persist_manifest(job: &Job) -> Result<()> {
        let manifest = Manifest::from_job(job);
        persist_manifest(&job.temp_dir, &manifest)
    }

    pub fn load(temp_dir: &Path) -> Result<Manifest> {
        load_manifest(temp_dir)
    }

    /// Streams part files in segment-index order into `final_path.partial`,
    /// then atomically renames to `final_path` and removes `temp_dir`.
    /// §4.7/§4.2: any failure here leaves `temp_dir` intact.
    pub fn finalize(job: &Job) -> Result<PathBuf> {
        if !job.all_segments_done() {
            return Err(DlmError::Internal(
                "finalize called before all segments done".into(),
            ));
        }
        if let Some(total) = job.total_size {
            let sum: u64 = job.segments.iter().map(|s| s.bytes_written).sum();
            if sum != total {
                return Err(DlmError::Internal(format!(
                    "segment byte sum {sum} != total_size {total}"
                )));
            }
        }

        let partial_path = job.final_path.with_extension(
            job.final_path
                .extension()
                .map(|e| format!("{}.partial", e.to_string_lossy()))
                .unwrap_or_else(|| "partial".to_string()),
        );

        {
            let out = fs::File::create(&partial_path)?;
            let mut writer = BufWriter::with_capacity(1 << 20, out);
            let mut segments = job.segments.clone();
            segments.sort_by_key(|s| s.index);
            for seg in &segments {
                let part_path = job.temp_dir.join(seg.part_filename());
                let infile = fs::File::open(&part_path)?;
                let mut reader = BufReader::with_capacity(1 << 20, infile);
                let mut buf = [0u8; 1 << 20];
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    writer.write_all(&buf[..n])?;
                }
            }
            writer.flush()?;
        }

        if let Some(parent) = job.final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&partial_path, &job.final_path)?;
        fs::remove_dir_all(&job.temp_dir)?;
        Ok(job.final_path.clone())
    }

    /// Removes `temp_dir` entirely (used on cancel).
    pub fn discard(temp_dir: &Path) -> Result<()> {
        if temp_dir.exists() {
            fs::remove_dir_all(temp_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Job, JobStatus, Segment};
    use std::collections::HashMap;
    use std::time::SystemTime;

    fn job_with_segments(dir: &Path, final_path: PathBuf, contents: &[&[u8]]) -> Job {
        let mut segments = Vec::new();
        let mut start = 0u64;
        for (i, chunk) in contents.iter().enumerate() {
            let end = start + chunk.len() as u64;
            let mut seg = Segment::new_range(i, start, end);
            let mut handle = SegmentStore::open_segment(dir, i, seg.range_len(), 0).unwrap();
            handle.write(chunk).unwrap();
            SegmentStore::flush_and_close(handle).unwrap();
            seg.bytes_written = chunk.len() as u64;
            seg.state = crate::model::SegmentState::Done;
            segments.push(seg);
            start = end;
        }
        Job {
            id: "j1".into(),
            schema_version: 1,
            url: "u".into(),
            referer: None,
            headers: HashMap::new(),
            proxy: None,
            cookies: HashMap::new(),
            total_size: Some(start),
            resumable: true,
            effective_url: "u".into(),
            server_filename: None,
            content_type: None,
            etag: None,
            last_modified: None,
            final_path,
            temp_dir: dir.to_path_buf(),
            max_connections: 1,
            segment_size_hint: 1024,
            speed_limit_bytes: None,
            status: JobStatus::Running,
            downloaded_bytes: start,
            rate_ewma_bps: 0.0,
            last_error: None,
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
            segments,
            media: None,
            child_job_ids: vec![],
            readmission_count: 0,
            readmission_window_start: None,
        }
    }

    #[test]
    fn finalize_concatenates_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("out.bin");
        let job = job_with_segments(dir.path(), final_path.clone(), &[b"hello", b"world"]);
        let written = SegmentStore::finalize(&job).unwrap();
        assert_eq!(written, final_path);
        let data = fs::read(&final_path).unwrap();
        assert_eq!(&data, b"helloworld");
        assert!(!dir.path().exists());
    }

    #[test]
    fn finalize_rejects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("out.bin");
        let mut job = job_with_segments(dir.path(), final_path, &[b"hello"]);
        job.total_size = Some(999);
        let err = SegmentStore::finalize(&job).unwrap_err();
        assert!(matches!(err, DlmError::Internal(_)));
    }
}
