//! Final-stage muxing: merging decrypted fragments and handing them to an
//! external muxer binary (ffmpeg) for container remux/tagging (§4.8 steps
//! 4-6, §6 `MediaMuxer` contract).

use crate::error::{DlmError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// External media-muxer contract named in §6. Implementations shell out to
/// a binary (ffmpeg by default) rather than linking a muxing library.
#[async_trait::async_trait]
pub trait MediaMuxer: Send + Sync {
    /// Merges a remuxed video-only track with an optional separately-fetched
    /// audio track into `output` (§4.8 step 4). When `audio_path` is `None`
    /// the video track already carries its own audio and `merge` degenerates
    /// to placing it at `output`.
    async fn merge(&self, video_path: &Path, audio_path: Option<&Path>, output: &Path) -> Result<()>;

    /// Remuxes an HLS fragment sequence (already concatenated as transport
    /// stream) into the requested container.
    async fn mux_hls(&self, concatenated_ts: &Path, output: &Path) -> Result<()>;

    /// Applies metadata tags (title, etc.) to an already-muxed file in
    /// place.
    async fn tag(&self, path: &Path, title: Option<&str>) -> Result<()>;
}

/// `MediaMuxer` backed by an `ffmpeg` subprocess, invoked with a concat
/// demuxer list for `merge`/`mux_hls` and `-metadata` for `tag`.
pub struct FfmpegMuxer {
    binary: PathBuf,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegMuxer {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DlmError::MuxFailed(format!("spawning {}: {e}", self.binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DlmError::MuxFailed(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MediaMuxer for FfmpegMuxer {
    async fn merge(&self, video_path: &Path, audio_path: Option<&Path>, output: &Path) -> Result<()> {
        match audio_path {
            Some(audio_path) => {
                self.run(&[
                    "-y",
                    "-i",
                    &video_path.to_string_lossy(),
                    "-i",
                    &audio_path.to_string_lossy(),
                    "-map",
                    "0:v:0",
                    "-map",
                    "1:a:0",
                    "-c",
                    "copy",
                    &output.to_string_lossy(),
                ])
                .await
            }
            // No separate audio track: the video rendition already carries
            // everything the final file needs.
            None => {
                tokio::fs::copy(video_path, output).await.map_err(DlmError::Io)?;
                Ok(())
            }
        }
    }

    async fn mux_hls(&self, concatenated_ts: &Path, output: &Path) -> Result<()> {
        self.run(&[
            "-y",
            "-i",
            &concatenated_ts.to_string_lossy(),
            "-c",
            "copy",
            "-bsf:a",
            "aac_adtstoasc",
            &output.to_string_lossy(),
        ])
        .await
    }

    async fn tag(&self, path: &Path, title: Option<&str>) -> Result<()> {
        let Some(title) = title else { return Ok(()) };
        let tmp = path.with_extension("tagged.tmp");
        self.run(&[
            "-y",
            "-i",
            &path.to_string_lossy(),
            "-c",
            "copy",
            "-metadata",
            &format!("title={title}"),
            &tmp.to_string_lossy(),
        ])
        .await?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(DlmError::Io)?;
        Ok(())
    }
}
