//! C8 VideoPipeline: HLS playlist expansion, per-fragment AES-128-CBC
//! decryption, and muxer invocation (§4.8 steps 1-6).

pub mod decrypt;
pub mod hls;
pub mod muxer;

pub use decrypt::{decrypt_segment, iv_from_sequence_number};
pub use hls::{expand_media_playlist, fragments_to_segments, HlsFragment};
pub use muxer::{FfmpegMuxer, MediaMuxer};

use crate::error::{DlmError, Result};
use crate::model::Job;
use crate::transport::Transport;
use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Drives one segmented job from playlist to final muxed file. Plain HTTP
/// jobs never go through here — only `Protocol::Hls`/`Dash` formats do.
pub struct VideoPipeline<'a> {
    transport: &'a dyn Transport,
    muxer: &'a dyn MediaMuxer,
    work_dir: PathBuf,
}

impl<'a> VideoPipeline<'a> {
    pub fn new(transport: &'a dyn Transport, muxer: &'a dyn MediaMuxer, work_dir: PathBuf) -> Self {
        Self {
            transport,
            muxer,
            work_dir,
        }
    }

    fn fetch_key<'k>(&self, cache: &'k mut HashMap<String, [u8; 16]>, key_uri: &str) -> Result<[u8; 16]> {
        if let Some(key) = cache.get(key_uri) {
            return Ok(*key);
        }
        let bytes = hls::fetch_text(self.transport, key_uri)?;
        if bytes.len() != 16 {
            return Err(DlmError::DecryptFailed(format!(
                "key at {key_uri} is {} bytes, expected 16",
                bytes.len()
            )));
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(&bytes);
        cache.insert(key_uri.to_string(), key);
        Ok(key)
    }

    /// Fetches every fragment of one media playlist (one rendition — video
    /// or a separate audio track), decrypting as needed, and concatenates
    /// them in sequence order into `output`. Shared by the video and audio
    /// legs of §4.8 steps 3/4 since both are "a sequence of possibly
    /// encrypted HLS fragments" the same way.
    async fn fetch_rendition(&self, playlist_url: &str, subdir: &str, output: &Path) -> Result<()> {
        let frag_dir = self.work_dir.join(subdir);
        fs::create_dir_all(&frag_dir)?;

        let playlist_bytes = hls::fetch_text(self.transport, playlist_url)?;
        let fragments = hls::expand_media_playlist(playlist_url, &playlist_bytes)?;
        if fragments.is_empty() {
            return Err(DlmError::ProbeFailed("HLS playlist has no segments".into()));
        }

        let mut key_cache = HashMap::new();
        let mut fragment_paths = Vec::with_capacity(fragments.len());

        for fragment in &fragments {
            let raw = hls::fetch_text(self.transport, &fragment.url)?;
            let payload = match &fragment.key_uri {
                Some(key_uri) => {
                    let key = self.fetch_key(&mut key_cache, key_uri)?;
                    let iv = fragment
                        .iv
                        .unwrap_or_else(|| decrypt::iv_from_sequence_number(fragment.sequence));
                    decrypt::decrypt_segment(&raw, &key, &iv)?
                }
                None => raw,
            };

            let path = frag_dir.join(format!("frag-{:06}.ts", fragment.sequence));
            fs::write(&path, &payload)?;
            fragment_paths.push(path);
        }

        concat_files(&fragment_paths, output)?;
        for path in &fragment_paths {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }

    /// §4.8: fetch the video rendition (and, when the selected video format
    /// carries no audio, a separate audio rendition), remux each, merge,
    /// tag, and clean up scratch files.
    pub async fn run_hls(&self, job: &Job) -> Result<PathBuf> {
        fs::create_dir_all(&self.work_dir)?;

        let media = job
            .media
            .as_ref()
            .ok_or_else(|| DlmError::Internal("video pipeline requires job.media".into()))?;
        let video_format = media
            .best_format()
            .ok_or_else(|| DlmError::ProbeFailed("no video format in media plan".into()))?;
        let audio_format = media.best_audio_only();
        let container_ext = job.final_path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");

        let video_concat = self.work_dir.join("video.concat.ts");
        self.fetch_rendition(&video_format.url, "video", &video_concat).await?;
        let video_muxed = self.work_dir.join(format!("video.muxed.{container_ext}"));
        self.muxer.mux_hls(&video_concat, &video_muxed).await?;

        if let Some(audio_format) = audio_format {
            // §4.8 step 4: run the same fetch/decrypt/concat/remux process
            // for the separate audio track, then merge the two.
            let audio_concat = self.work_dir.join("audio.concat.ts");
            self.fetch_rendition(&audio_format.url, "audio", &audio_concat).await?;
            let audio_muxed = self.work_dir.join(format!("audio.muxed.{container_ext}"));
            self.muxer.mux_hls(&audio_concat, &audio_muxed).await?;
            self.muxer.merge(&video_muxed, Some(&audio_muxed), &job.final_path).await?;
            let _ = fs::remove_file(&audio_concat);
            let _ = fs::remove_file(&audio_muxed);
        } else {
            self.muxer.merge(&video_muxed, None, &job.final_path).await?;
        }
        let _ = fs::remove_file(&video_concat);
        let _ = fs::remove_file(&video_muxed);

        self.muxer.tag(&job.final_path, Some(&media.title)).await?;

        Ok(job.final_path.clone())
    }
}

/// Streams `paths` in order into `output`. Already-decrypted HLS fragments
/// are self-synchronizing MPEG-TS packets, so a byte-level concatenation is
/// a valid substitute for ffmpeg's concat demuxer here and avoids a third
/// subprocess invocation per rendition.
fn concat_files(paths: &[PathBuf], output: &Path) -> Result<()> {
    let mut writer = BufWriter::new(fs::File::create(output)?);
    let mut buf = [0u8; 64 * 1024];
    for path in paths {
        let mut reader = BufReader::new(fs::File::open(path)?);
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Request, Sink, SinkSignal, TransportError, TransportErrorKind, TransportSuccess};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubTransport {
        responses: Mutex<HashMap<String, Vec<u8>>>,
        calls: AtomicUsize,
    }

    impl Transport for StubTransport {
        fn fetch(&self, req: &Request, sink: &mut dyn Sink) -> std::result::Result<TransportSuccess, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self
                .responses
                .lock()
                .unwrap()
                .get(&req.url)
                .cloned()
                .ok_or_else(|| TransportError {
                    kind: TransportErrorKind::Connect,
                    message: format!("no stub response for {}", req.url),
                })?;
            sink.write_chunk(&body, body.len() as u64);
            Ok(TransportSuccess {
                status_code: 200,
                response_headers: HashMap::new(),
                final_url: req.url.clone(),
                total_received: body.len() as u64,
            })
        }
    }

    struct NoopMuxer;

    #[async_trait::async_trait]
    impl MediaMuxer for NoopMuxer {
        async fn merge(&self, video_path: &std::path::Path, audio_path: Option<&std::path::Path>, output: &std::path::Path) -> Result<()> {
            let mut combined = fs::read(video_path)?;
            if let Some(audio_path) = audio_path {
                combined.extend(fs::read(audio_path)?);
            }
            fs::write(output, combined)?;
            Ok(())
        }

        async fn mux_hls(&self, concatenated_ts: &std::path::Path, output: &std::path::Path) -> Result<()> {
            fs::copy(concatenated_ts, output)?;
            Ok(())
        }

        async fn tag(&self, _path: &std::path::Path, _title: Option<&str>) -> Result<()> {
            Ok(())
        }
    }

    fn blank_job(final_path: PathBuf, media: crate::model::MediaInfo) -> Job {
        use crate::model::JobStatus;
        use std::time::SystemTime;
        Job {
            id: "j1".into(),
            schema_version: 1,
            url: "https://example.com/playlist.m3u8".into(),
            referer: None,
            headers: HashMap::new(),
            proxy: None,
            cookies: HashMap::new(),
            total_size: None,
            resumable: false,
            effective_url: "https://example.com/playlist.m3u8".into(),
            server_filename: None,
            content_type: None,
            etag: None,
            last_modified: None,
            final_path,
            temp_dir: PathBuf::from("/tmp/unused"),
            max_connections: 1,
            segment_size_hint: 1 << 20,
            speed_limit_bytes: None,
            status: JobStatus::Running,
            downloaded_bytes: 0,
            rate_ewma_bps: 0.0,
            last_error: None,
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
            segments: vec![],
            media: Some(media),
            child_job_ids: vec![],
            readmission_count: 0,
            readmission_window_start: None,
        }
    }

    fn single_video_format(playlist_url: &str) -> crate::model::MediaInfo {
        use crate::model::{Format, MediaInfo, Protocol};
        MediaInfo {
            title: "demo".into(),
            ext: "ts".into(),
            is_live: false,
            formats: vec![Format {
                format_id: "0".into(),
                url: playlist_url.into(),
                protocol: Protocol::Hls,
                vcodec: Some("avc1".into()),
                acodec: Some("mp4a".into()),
                width: None,
                height: None,
                abr: None,
                vbr: None,
                filesize: None,
                fragments: None,
                http_headers: HashMap::new(),
                decryption_key: None,
            }],
        }
    }

    #[tokio::test]
    async fn run_hls_concatenates_plain_fragments_in_order() {
        let playlist = concat!(
            "#EXTM3U\n",
            "#EXT-X-MEDIA-SEQUENCE:0\n",
            "#EXTINF:2.0,\n",
            "seg0.ts\n",
            "#EXTINF:2.0,\n",
            "seg1.ts\n",
            "#EXT-X-ENDLIST\n",
        );
        let mut responses = HashMap::new();
        responses.insert("https://example.com/playlist.m3u8".to_string(), playlist.as_bytes().to_vec());
        responses.insert("https://example.com/seg0.ts".to_string(), b"AAA".to_vec());
        responses.insert("https://example.com/seg1.ts".to_string(), b"BBB".to_vec());

        let transport = StubTransport {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        };
        let muxer = NoopMuxer;
        let work_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("out.ts");

        let pipeline = VideoPipeline::new(&transport, &muxer, work_dir.path().to_path_buf());
        let media = single_video_format("https://example.com/playlist.m3u8");
        let job = blank_job(final_path.clone(), media);
        let result = pipeline.run_hls(&job).await.unwrap();

        assert_eq!(result, final_path);
        assert_eq!(fs::read(&final_path).unwrap(), b"AAABBB");
    }

    #[tokio::test]
    async fn run_hls_merges_separate_audio_and_video_renditions() {
        use crate::model::{Format, MediaInfo, Protocol};

        let video_playlist = concat!(
            "#EXTM3U\n",
            "#EXT-X-MEDIA-SEQUENCE:0\n",
            "#EXTINF:2.0,\n",
            "v0.ts\n",
            "#EXT-X-ENDLIST\n",
        );
        let audio_playlist = concat!(
            "#EXTM3U\n",
            "#EXT-X-MEDIA-SEQUENCE:0\n",
            "#EXTINF:2.0,\n",
            "a0.ts\n",
            "#EXT-X-ENDLIST\n",
        );
        let mut responses = HashMap::new();
        responses.insert("https://example.com/video.m3u8".to_string(), video_playlist.as_bytes().to_vec());
        responses.insert("https://example.com/v0.ts".to_string(), b"VIDEO".to_vec());
        responses.insert("https://example.com/audio.m3u8".to_string(), audio_playlist.as_bytes().to_vec());
        responses.insert("https://example.com/a0.ts".to_string(), b"AUDIO".to_vec());

        let transport = StubTransport {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        };
        let muxer = NoopMuxer;
        let work_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let final_path = out_dir.path().join("out.ts");

        let pipeline = VideoPipeline::new(&transport, &muxer, work_dir.path().to_path_buf());
        let media = MediaInfo {
            title: "demo".into(),
            ext: "ts".into(),
            is_live: false,
            formats: vec![
                Format {
                    format_id: "video".into(),
                    url: "https://example.com/video.m3u8".into(),
                    protocol: Protocol::Hls,
                    vcodec: Some("avc1".into()),
                    acodec: None,
                    width: None,
                    height: None,
                    abr: None,
                    vbr: Some(1000.0),
                    filesize: None,
                    fragments: None,
                    http_headers: HashMap::new(),
                    decryption_key: None,
                },
                Format {
                    format_id: "audio".into(),
                    url: "https://example.com/audio.m3u8".into(),
                    protocol: Protocol::Hls,
                    vcodec: Some("none".into()),
                    acodec: Some("mp4a".into()),
                    width: None,
                    height: None,
                    abr: None,
                    vbr: None,
                    filesize: None,
                    fragments: None,
                    http_headers: HashMap::new(),
                    decryption_key: None,
                },
            ],
        };
        let job = blank_job(final_path.clone(), media);
        pipeline.run_hls(&job).await.unwrap();

        assert_eq!(fs::read(&final_path).unwrap(), b"VIDEOAUDIO");
    }
}
