//! C9 Brain: the global scheduler. Admission control, per-job worker
//! sizing, refresh policy, pause/cancel dispatch, and startup recovery
//! (§4.9). Grounded on the teacher's `scheduler/{choose.rs,execute/*,
//! run/*}` and `safe_resume/validate/mod.rs` (refresh validation), adapted
//! from its single-sequential-job-at-a-time loop to true concurrent
//! admission across jobs.

mod refresh;
mod segments;

use crate::config::EngineConfig;
use crate::control::JobControl;
use crate::error::{DlmError, Result};
use crate::events::EventBus;
use crate::extractor::InfoExtractor;
use crate::model::{DownloadSpec, Job, JobId, JobStatus, Segment, SegmentState};
use crate::persistence::JobsIndex;
use crate::probe;
use crate::rate_limiter::RateLimiter;
use crate::registry::Registry;
use crate::retry::RetryPolicy;
use crate::segment_store::SegmentStore;
use crate::transport::Transport;
use crate::worker::{Worker, WorkerOutcome};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// How often `run_job`'s reporter thread publishes `Event::Progress` while a
/// round of segment workers is in flight (§4.1: "at least every ~250ms").
const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_millis(250);

const READMISSION_COOLDOWN: Duration = Duration::from_secs(60);
const MAX_READMISSIONS_PER_HOUR: u32 = 3;

/// The global scheduler. One `Brain` per running process; the CLI/daemon
/// constructs it once at startup and calls the §6 control surface on it.
pub struct Brain {
    registry: Arc<Registry>,
    control: Arc<JobControl>,
    events: Arc<EventBus>,
    rate_limiter: Arc<RateLimiter>,
    index: Arc<JobsIndex>,
    transport: Arc<dyn Transport>,
    extractor: Option<Arc<dyn InfoExtractor>>,
    cfg: EngineConfig,
    max_concurrent: Arc<AtomicUsize>,
    active_count: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl Brain {
    pub fn new(
        cfg: EngineConfig,
        transport: Arc<dyn Transport>,
        index: Arc<JobsIndex>,
        extractor: Option<Arc<dyn InfoExtractor>>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(cfg.global_speed_limit_bytes));
        Self {
            registry: Arc::new(Registry::new()),
            control: Arc::new(JobControl::new()),
            events: Arc::new(EventBus::new()),
            rate_limiter,
            index,
            transport,
            extractor,
            max_concurrent: Arc::new(AtomicUsize::new(cfg.max_concurrent_jobs)),
            active_count: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
            cfg,
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    fn new_job_id(&self) -> JobId {
        format!("job-{:08x}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// §6 `submit(spec) -> job_id`. Does not probe; call `start` to run it.
    pub fn submit(&self, spec: DownloadSpec) -> Result<JobId> {
        let id = self.new_job_id();
        let filename = spec.filename.clone().unwrap_or_else(|| "download".to_string());
        let final_path = spec.folder.join(&filename);
        let temp_dir = spec.folder.join(format!(".{id}.dlm"));

        let now = SystemTime::now();
        let job = Job {
            id: id.clone(),
            schema_version: crate::segment_store::SCHEMA_VERSION,
            url: spec.url.clone(),
            referer: None,
            headers: spec.headers,
            proxy: spec.proxy,
            cookies: spec.cookies,
            total_size: None,
            resumable: false,
            effective_url: spec.url,
            server_filename: None,
            content_type: None,
            etag: None,
            last_modified: None,
            final_path,
            temp_dir,
            max_connections: spec.connections.unwrap_or(self.cfg.max_connections_per_job),
            segment_size_hint: self.cfg.segment_size_hint_bytes,
            speed_limit_bytes: spec.speed_limit_bytes,
            status: JobStatus::Pending,
            downloaded_bytes: 0,
            rate_ewma_bps: 0.0,
            last_error: None,
            created_at: now,
            updated_at: now,
            segments: vec![],
            media: None,
            child_job_ids: vec![],
            readmission_count: 0,
            readmission_window_start: None,
        };

        self.index.add_job(id.clone(), job.url.clone(), job.final_path.clone(), job.temp_dir.clone())?;
        self.registry.insert(job);
        Ok(id)
    }

    /// §6 `start(job_id)`: `Pending -> Probing -> Queued`, or `Paused ->
    /// Queued` directly when resuming.
    pub fn start(self: &Arc<Self>, job_id: &JobId) -> Result<()> {
        let job = self
            .registry
            .get_clone(job_id)
            .ok_or_else(|| DlmError::Internal(format!("unknown job {job_id}")))?;

        match job.status {
            JobStatus::Paused => {
                self.transition(job_id, JobStatus::Queued)?;
                self.try_admit();
                Ok(())
            }
            JobStatus::Pending => {
                self.transition(job_id, JobStatus::Probing)?;
                let this = self.clone();
                let id = job_id.clone();
                std::thread::spawn(move || this.probe_then_queue(&id));
                Ok(())
            }
            other => Err(DlmError::Internal(format!("cannot start job in state {other:?}"))),
        }
    }

    fn probe_then_queue(self: &Arc<Self>, job_id: &JobId) {
        let job = match self.registry.get_clone(job_id) {
            Some(j) => j,
            None => return,
        };

        match probe::probe(&*self.transport, &job.url, job.headers.clone()) {
            Ok(result) => {
                let max_connections = job.max_connections;
                let segments = segments::plan_segments(result.total_size, result.resumable, max_connections, &self.cfg);
                let _ = self.registry.mutate(job_id, |j| {
                    j.total_size = result.total_size;
                    j.resumable = result.resumable;
                    j.effective_url = result.effective_url;
                    j.content_type = result.content_type.clone();
                    j.etag = result.etag.clone();
                    j.last_modified = result.last_modified.clone();
                    if j.server_filename.is_none() {
                        j.server_filename = result.server_filename.clone();
                    }
                    j.segments = segments;
                });
                let _ = self.index.update_metadata(job_id, result.resumable);
                if self.transition(job_id, JobStatus::Queued).is_ok() {
                    self.try_admit();
                }
            }
            Err(e) => {
                self.fail(job_id, e);
            }
        }
    }

    /// §6 `pause(job_id)`: signals workers, persists the manifest, frees a
    /// scheduler slot.
    pub fn pause(&self, job_id: &JobId) -> Result<()> {
        self.control.request_pause(job_id);
        Ok(())
    }

    /// §6 `cancel(job_id)`: reachable from any non-terminal state.
    pub fn cancel(&self, job_id: &JobId) -> Result<()> {
        self.control.request_cancel(job_id);
        if let Some(job) = self.registry.get_clone(job_id) {
            if !matches!(job.status, JobStatus::Running | JobStatus::Probing | JobStatus::Merging | JobStatus::Refreshing) {
                self.transition(job_id, JobStatus::Cancelled)?;
            }
        }
        Ok(())
    }

    /// §6 `remove(job_id, delete_files)`.
    pub fn remove(&self, job_id: &JobId, delete_files: bool) -> Result<()> {
        self.control.request_cancel(job_id);
        if let Some(job) = self.registry.remove(job_id) {
            if delete_files && job.temp_dir.exists() {
                let _ = SegmentStore::discard(&job.temp_dir);
            }
        }
        self.control.unregister(job_id);
        self.rate_limiter.unregister_job(job_id);
        self.index.remove_job(job_id)?;
        Ok(())
    }

    pub fn list(&self) -> Vec<Job> {
        self.registry.list()
    }

    pub fn set_global_speed_limit(&self, bytes_per_sec: u64) {
        self.rate_limiter.set_global_limit(bytes_per_sec);
    }

    pub fn set_max_concurrent(self: &Arc<Self>, n: usize) {
        self.max_concurrent.store(n.clamp(1, 64), Ordering::Relaxed);
        self.try_admit();
    }

    /// Startup recovery (§4.9): enumerate persisted jobs, restore
    /// non-`Completed` ones to `Queued`/`Error`, and load each manifest back
    /// into the in-memory registry.
    pub fn recover_at_startup(self: &Arc<Self>) -> Result<u64> {
        let touched = self.index.recover_running_jobs()?;
        let now = SystemTime::now();
        for record in self.index.list_jobs() {
            let job = match crate::segment_store::load_manifest(&record.temp_dir) {
                Ok(manifest) => {
                    let segments: Vec<Segment> = manifest.segments.into_iter().map(Segment::from).collect();
                    Job {
                        id: record.id.clone(),
                        schema_version: manifest.schema_version,
                        url: manifest.url,
                        referer: None,
                        headers: manifest.headers,
                        proxy: None,
                        cookies: HashMap::new(),
                        total_size: manifest.total_size,
                        resumable: manifest.resumable,
                        effective_url: manifest.effective_url,
                        server_filename: None,
                        content_type: None,
                        etag: manifest.etag,
                        last_modified: manifest.last_modified,
                        final_path: manifest.final_path,
                        temp_dir: record.temp_dir.clone(),
                        max_connections: self.cfg.max_connections_per_job,
                        segment_size_hint: self.cfg.segment_size_hint_bytes,
                        speed_limit_bytes: None,
                        status: record.status,
                        downloaded_bytes: segments.iter().map(|s| s.bytes_written).sum(),
                        rate_ewma_bps: 0.0,
                        last_error: None,
                        created_at: now,
                        updated_at: now,
                        segments,
                        media: manifest.media,
                        child_job_ids: vec![],
                        readmission_count: 0,
                        readmission_window_start: None,
                    }
                }
                // No manifest (e.g. a completed job whose temp_dir was
                // already cleaned up by `finalize`): synthesize a minimal
                // entry so `list()` still reports it after a restart.
                Err(_) => Job {
                    id: record.id.clone(),
                    schema_version: crate::segment_store::SCHEMA_VERSION,
                    url: record.url.clone(),
                    referer: None,
                    headers: HashMap::new(),
                    proxy: None,
                    cookies: HashMap::new(),
                    total_size: None,
                    resumable: record.resumable,
                    effective_url: record.url,
                    server_filename: None,
                    content_type: None,
                    etag: None,
                    last_modified: None,
                    final_path: record.final_path,
                    temp_dir: record.temp_dir,
                    max_connections: self.cfg.max_connections_per_job,
                    segment_size_hint: self.cfg.segment_size_hint_bytes,
                    speed_limit_bytes: None,
                    status: record.status,
                    downloaded_bytes: 0,
                    rate_ewma_bps: 0.0,
                    last_error: None,
                    created_at: now,
                    updated_at: now,
                    segments: vec![],
                    media: None,
                    child_job_ids: vec![],
                    readmission_count: 0,
                    readmission_window_start: None,
                },
            };
            self.registry.insert(job);
        }
        self.try_admit();
        Ok(touched)
    }

    fn transition(&self, job_id: &JobId, to: JobStatus) -> Result<JobStatus> {
        let old = self.registry.set_status(job_id, to)?;
        self.events.publish_state(job_id.clone(), old, to);
        let _ = self.index.set_state(job_id, to);
        Ok(old)
    }

    /// Marks a job `Error`. Does not touch the active-slot accounting —
    /// callers that hold a slot (i.e. everything except the pre-admission
    /// probe failure path) release it separately via
    /// [`Self::release_slot_and_admit`].
    fn fail(&self, job_id: &JobId, err: DlmError) {
        let (kind, _status, message) = err.status_triple();
        self.events.publish_error(job_id.clone(), kind, message.clone());
        let _ = self.registry.mutate(job_id, |j| j.last_error = Some(err.status_triple()));
        let _ = self.transition(job_id, JobStatus::Error);
    }

    /// Releases the active-set slot a job held, then gives it to the next
    /// queued job if any. Every path that leaves the active set (completion,
    /// failure, pause, cancel) goes through here exactly once.
    fn release_slot_and_admit(self: &Arc<Self>, job_id: &JobId) {
        self.control.unregister(job_id);
        self.rate_limiter.unregister_job(job_id);
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        self.try_admit();
    }

    /// Admits queued jobs (FIFO by `created_at`) while slots are free.
    /// §4.9: admission never preempts a `Running` job.
    fn try_admit(self: &Arc<Self>) {
        loop {
            let limit = self.max_concurrent.load(Ordering::Relaxed);
            let active = self.active_count.load(Ordering::Relaxed);
            if active >= limit {
                return;
            }
            let mut queued: Vec<Job> = self
                .registry
                .list()
                .into_iter()
                .filter(|j| j.status == JobStatus::Queued)
                .collect();
            queued.sort_by_key(|j| j.created_at);
            let Some(next) = queued.into_iter().next() else {
                return;
            };
            if self
                .active_count
                .compare_exchange(active, active + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }
            if self.transition(&next.id, JobStatus::Running).is_err() {
                self.active_count.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
            self.rate_limiter.set_job_limit(&next.id, next.speed_limit_bytes);
            let this = self.clone();
            let id = next.id.clone();
            std::thread::spawn(move || this.run_job(&id));
        }
    }

    /// Drives one admitted job's workers to completion, handling refresh
    /// escalation and failure/readmission as it goes (§4.9).
    fn run_job(self: &Arc<Self>, job_id: &JobId) {
        let tokens = self.control.register(job_id.clone());
        loop {
            let Some(job) = self.registry.get_clone(job_id) else { return };

            let idle_indices: Vec<usize> = job
                .segments
                .iter()
                .enumerate()
                .filter(|(_, s)| !matches!(s.state, SegmentState::Done))
                .map(|(i, _)| i)
                .collect();

            let mut range_rejected = false;
            let mut hard_failure: Option<DlmError> = None;
            let mut stopped = false;

            let active_indices: Vec<usize> = idle_indices
                .iter()
                .copied()
                .take(job.max_connections.max(1))
                .collect();
            // Bytes already on disk for segments this round won't touch
            // (already `Done`, or idle but past this round's fan-out width).
            let base_bytes: u64 = job
                .segments
                .iter()
                .enumerate()
                .filter(|(i, _)| !active_indices.contains(i))
                .map(|(_, s)| s.bytes_written)
                .sum();
            let total_size = job.total_size;

            std::thread::scope(|scope| {
                let worker = Worker {
                    transport: &*self.transport,
                    rate_limiter: &self.rate_limiter,
                    retry_policy: RetryPolicy {
                        max_attempts: self.cfg.max_worker_retries,
                        base_delay: Duration::from_millis(self.cfg.retry_base_delay_ms),
                        max_delay: Duration::from_secs(self.cfg.retry_max_delay_secs),
                    },
                    job_id: job_id.clone(),
                    url: job.effective_url.clone(),
                    headers: job.headers.clone(),
                    temp_dir: job.temp_dir.clone(),
                };

                let mut handles = Vec::new();
                let mut progress_counters: Vec<(u64, Arc<AtomicU64>)> = Vec::new();
                for &index in &active_indices {
                    let mut segment = job.segments[index].clone();
                    let start_bytes = segment.bytes_written;
                    let tokens = tokens.clone();
                    let worker = &worker;
                    let progress = Arc::new(AtomicU64::new(0));
                    progress_counters.push((start_bytes, progress.clone()));
                    handles.push(scope.spawn(move || {
                        let outcome = worker.run_segment(&mut segment, &tokens, progress);
                        (index, segment, outcome)
                    }));
                }

                let stop_reporter = Arc::new(AtomicBool::new(false));
                {
                    let stop_reporter = stop_reporter.clone();
                    let progress_counters = progress_counters.clone();
                    let events = self.events.clone();
                    let reporter_job_id = job_id.clone();
                    scope.spawn(move || {
                        let sample = |c: &[(u64, Arc<AtomicU64>)]| -> u64 {
                            base_bytes + c.iter().map(|(start, p)| start + p.load(Ordering::Relaxed)).sum::<u64>()
                        };
                        let mut last_instant = Instant::now();
                        let mut last_bytes = sample(&progress_counters);
                        while !stop_reporter.load(Ordering::Relaxed) {
                            std::thread::sleep(PROGRESS_REPORT_INTERVAL);
                            let downloaded = sample(&progress_counters);
                            let elapsed = last_instant.elapsed().as_secs_f64();
                            let rate = if elapsed > 0.0 {
                                downloaded.saturating_sub(last_bytes) as f64 / elapsed
                            } else {
                                0.0
                            };
                            let eta = match total_size {
                                Some(total) if rate > 0.0 => {
                                    Some((total.saturating_sub(downloaded)) as f64 / rate)
                                }
                                _ => None,
                            };
                            events.publish_progress(reporter_job_id.clone(), downloaded, total_size, rate, eta);
                            last_instant = Instant::now();
                            last_bytes = downloaded;
                        }
                    });
                }

                for handle in handles {
                    let (index, segment, outcome) = handle.join().unwrap_or_else(|_| {
                        (0, Segment::new_range(0, 0, 0), WorkerOutcome::Failed(DlmError::Internal("worker panicked".into())))
                    });
                    let _ = self.registry.update_segment(job_id, index, |s| *s = segment);
                    match outcome {
                        WorkerOutcome::Done => {}
                        WorkerOutcome::RangeRejected => range_rejected = true,
                        WorkerOutcome::Stopped => stopped = true,
                        WorkerOutcome::Failed(e) => hard_failure = Some(e),
                    }
                }
                stop_reporter.store(true, Ordering::Relaxed);
            });

            let _ = self.registry.mutate(job_id, |j| {
                if let Some(total) = j.total_size {
                    let downloaded = j.downloaded_from_segments();
                    if downloaded > 0 {
                        j.rate_ewma_bps = downloaded as f64;
                    }
                    let _ = total;
                }
            });
            if let Some(job) = self.registry.get_clone(job_id) {
                let _ = SegmentStore::persist_manifest(&job);
            }

            if stopped {
                self.handle_stopped(job_id, &tokens);
                return;
            }
            if range_rejected {
                if !self.handle_range_rejected(job_id) {
                    return;
                }
                continue;
            }
            if let Some(e) = hard_failure {
                self.handle_segment_failure(job_id, e);
                return;
            }

            let Some(job) = self.registry.get_clone(job_id) else { return };
            if job.all_segments_done() {
                self.finish_job(job_id, &job);
                return;
            }
            // All idle segments dispatched but job not done (shouldn't
            // normally happen outside a short-read loop inside the worker
            // itself); re-check for newly idle work next iteration.
        }
    }

    fn handle_stopped(self: &Arc<Self>, job_id: &JobId, tokens: &crate::control::JobTokens) {
        if tokens.is_cancelled() {
            if let Some(job) = self.registry.get_clone(job_id) {
                let _ = SegmentStore::discard(&job.temp_dir);
            }
            let _ = self.transition(job_id, JobStatus::Cancelled);
        } else {
            let _ = self.transition(job_id, JobStatus::Paused);
        }
        self.release_slot_and_admit(job_id);
    }

    /// Returns true if the caller should keep driving the job (it was
    /// successfully refreshed and requeued for another pass).
    fn handle_range_rejected(self: &Arc<Self>, job_id: &JobId) -> bool {
        let Some(extractor) = &self.extractor else {
            self.handle_segment_failure(job_id, DlmError::RefreshFailed("no InfoExtractor configured".into()));
            return false;
        };
        let Some(job) = self.registry.get_clone(job_id) else { return false };

        let _ = self.transition(job_id, JobStatus::Refreshing);
        match refresh::refresh_and_validate(
            &*self.transport,
            extractor.as_ref(),
            &job.url,
            job.headers.clone(),
            job.total_size,
            job.etag.as_deref(),
        ) {
            Ok(outcome) => {
                let _ = self.registry.mutate(job_id, |j| {
                    j.effective_url = outcome.effective_url;
                    j.headers = outcome.headers;
                });
                if self.transition(job_id, JobStatus::Queued).is_err() {
                    return false;
                }
                let _ = self.transition(job_id, JobStatus::Running);
                true
            }
            Err(e) => {
                self.handle_segment_failure(job_id, e);
                false
            }
        }
    }

    /// §4.9 failure escalation: a transient failure on a resumable job is
    /// requeued after a cooldown, capped at 3 re-admissions per hour;
    /// anything else fails the job.
    fn handle_segment_failure(self: &Arc<Self>, job_id: &JobId, err: DlmError) {
        let Some(job) = self.registry.get_clone(job_id) else { return };
        let transient = matches!(err.kind(), crate::error::ErrorKind::TransportRetryable | crate::error::ErrorKind::TransportFatal);

        if !transient || !job.resumable {
            self.fail(job_id, err);
            self.release_slot_and_admit(job_id);
            return;
        }

        let now = SystemTime::now();
        let window_start = job.readmission_window_start.unwrap_or(now);
        let within_hour = now.duration_since(window_start).map(|d| d < Duration::from_secs(3600)).unwrap_or(true);
        let count = if within_hour { job.readmission_count } else { 0 };

        if count >= MAX_READMISSIONS_PER_HOUR {
            self.fail(job_id, err);
            self.release_slot_and_admit(job_id);
            return;
        }

        let _ = self.registry.mutate(job_id, |j| {
            j.readmission_count = count + 1;
            j.readmission_window_start = Some(if within_hour { window_start } else { now });
        });

        // Running has no direct edge back to Queued; park the job as
        // Paused for the cooldown window and requeue it from there.
        if self.transition(job_id, JobStatus::Paused).is_err() {
            self.fail(job_id, err);
            self.release_slot_and_admit(job_id);
            return;
        }
        self.release_slot_and_admit(job_id);
        let cooldown = READMISSION_COOLDOWN;
        let this = self.clone();
        let id = job_id.clone();
        std::thread::spawn(move || {
            std::thread::sleep(cooldown);
            if this.transition(&id, JobStatus::Queued).is_ok() {
                this.try_admit();
            }
        });
    }

    fn finish_job(self: &Arc<Self>, job_id: &JobId, job: &Job) {
        let result = if let Some(media) = &job.media {
            if media.formats.iter().any(|f| f.is_segmented()) {
                let _ = self.transition(job_id, JobStatus::Merging);
                self.run_video_pipeline(job)
            } else {
                self.assemble_plain(job_id, job)
            }
        } else {
            self.assemble_plain(job_id, job)
        };

        match result {
            Ok(()) => {
                let _ = self.transition(job_id, JobStatus::Completed);
            }
            Err(e) => self.fail(job_id, e),
        }
        self.release_slot_and_admit(job_id);
    }

    /// Concatenates a plain (non-HLS) job's part files via the assembler
    /// (checksum + collision policy), then reclaims its temp directory —
    /// `assemble` itself only writes the final file, the way `finalize` on
    /// this path used to bundle both into one call.
    fn assemble_plain(&self, job_id: &JobId, job: &Job) -> Result<()> {
        let outcome = crate::assembler::assemble(job, &crate::assembler::AssembleOptions::default())?;
        std::fs::remove_dir_all(&job.temp_dir).ok();
        let _ = self.registry.mutate(job_id, |j| j.final_path = outcome.final_path.clone());
        Ok(())
    }

    fn run_video_pipeline(&self, job: &Job) -> Result<()> {
        let muxer = crate::video::FfmpegMuxer::default();
        let pipeline = crate::video::VideoPipeline::new(&*self.transport, &muxer, job.temp_dir.join("video"));
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DlmError::Internal(e.to_string()))?;
        rt.block_on(pipeline.run_hls(job))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_id_increments() {
        let cfg = EngineConfig::default();
        let transport: Arc<dyn Transport> = Arc::new(crate::transport::CurlTransport::default());
        let index = Arc::new(JobsIndex::open(tempfile::tempdir().unwrap().path()).unwrap());
        let brain = Brain::new(cfg, transport, index, None);
        let a = brain.new_job_id();
        let b = brain.new_job_id();
        assert_ne!(a, b);
    }
}
