//! C7 Assembler: concatenates segment part files, verifies expected total,
//! optionally computes a digest, and renames to the final path (§4.7).

use crate::checksum::{DigestKind, RunningDigest};
use crate::error::{DlmError, Result};
use crate::model::Job;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy)]
pub enum CollisionPolicy {
    Overwrite,
    Rename,
}

pub struct AssembleOptions {
    pub digest: Option<DigestKind>,
    pub collision_policy: CollisionPolicy,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            digest: None,
            collision_policy: CollisionPolicy::Rename,
        }
    }
}

pub struct AssembleOutcome {
    pub final_path: PathBuf,
    pub digest_hex: Option<String>,
}

/// Picks a non-colliding path by appending ` (n)` before the extension,
/// matching the common download-manager collision convention.
fn next_available_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    for n in 1..10_000 {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
    }
    path.to_path_buf()
}

/// §4.7: pre-check all segments `Done` and sizes consistent, streaming-copy
/// part files in index order into `final_path.partial`, optionally digesting
/// as it goes, then renaming into place per the collision policy. On any
/// failure `temp_dir` is left intact.
pub fn assemble(job: &Job, opts: &AssembleOptions) -> Result<AssembleOutcome> {
    if !job.all_segments_done() {
        return Err(DlmError::Internal(
            "assemble called with incomplete segments".into(),
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

    let partial_path = {
        let mut p = job.final_path.clone().into_os_string();
        p.push(".partial");
        PathBuf::from(p)
    };

    let mut digest = opts.digest.map(RunningDigest::new);

    {
        let out = fs::File::create(&partial_path)?;
        let mut writer = BufWriter::with_capacity(1 << 20, out);
        let mut segments = job.segments.clone();
        segments.sort_by_key(|s| s.index);
        let mut buf = vec![0u8; 1 << 20];
        for seg in &segments {
            let part_path = job.temp_dir.join(seg.part_filename());
            let infile = fs::File::open(&part_path)?;
            let mut reader = BufReader::with_capacity(1 << 20, infile);
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                writer.write_all(&buf[..n])?;
                if let Some(d) = digest.as_mut() {
                    d.update(&buf[..n]);
                }
            }
        }
        writer.flush()?;
    }

    let target = match opts.collision_policy {
        CollisionPolicy::Overwrite => job.final_path.clone(),
        CollisionPolicy::Rename => next_available_path(&job.final_path),
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&partial_path, &target)?;

    Ok(AssembleOutcome {
        final_path: target,
        digest_hex: digest.map(|d| d.finalize_hex()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobStatus, Segment};
    use std::collections::HashMap;
    use std::time::SystemTime;

    fn job_with_parts(dir: &Path, final_path: PathBuf, parts: &[&[u8]]) -> Job {
        let mut segments = Vec::new();
        let mut start = 0u64;
        for (i, chunk) in parts.iter().enumerate() {
            fs::write(dir.join(format!("part-{i:06}")), chunk).unwrap();
            let end = start + chunk.len() as u64;
            let mut seg = Segment::new_range(i, start, end);
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
    fn assemble_concatenates_and_digests() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("out.bin");
        let job = job_with_parts(dir.path(), final_path.clone(), &[b"foo", b"bar"]);
        let outcome = assemble(
            &job,
            &AssembleOptions {
                digest: Some(DigestKind::Sha256),
                collision_policy: CollisionPolicy::Overwrite,
            },
        )
        .unwrap();
        assert_eq!(outcome.final_path, final_path);
        assert_eq!(fs::read(&final_path).unwrap(), b"foobar");
        assert!(outcome.digest_hex.unwrap().len() == 64);
    }

    #[test]
    fn collision_policy_rename_avoids_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("out.bin");
        fs::write(&final_path, b"existing").unwrap();
        let job = job_with_parts(dir.path(), final_path.clone(), &[b"new"]);
        let outcome = assemble(&job, &AssembleOptions::default()).unwrap();
        assert_ne!(outcome.final_path, final_path);
        assert_eq!(fs::read(&final_path).unwrap(), b"existing");
        assert_eq!(fs::read(&outcome.final_path).unwrap(), b"new");
    }
}
