//! C3 Worker: owns one Transport attempt for one segment, retries with
//! backoff, honors pause/cancel, and reports progress via the rate limiter
//! and event bus.

use crate::control::JobTokens;
use crate::error::{DlmError, Result};
use crate::model::{Segment, SegmentState};
use crate::rate_limiter::RateLimiter;
use crate::retry::{self, ErrorKind as RetryErrorKind, RetryDecision, RetryPolicy};
use crate::segment_store::SegmentStore;
use crate::transport::{
    RangeSpec, Request, Sink, SinkSignal, Transport, TransportError, TransportErrorKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const CHUNK_ACQUIRE_CAP: u64 = 64 * 1024;

/// Outcome of running one segment to completion (or as far as it gets).
pub enum WorkerOutcome {
    Done,
    /// Segment failed after exhausting retries, or hit a non-retryable
    /// transport error other than a range rejection.
    Failed(DlmError),
    /// The server rejected the byte range (416) — the caller (Brain) should
    /// escalate to the refresh policy (§4.9).
    RangeRejected,
    /// Pause or cancel was observed; caller decides the resulting job state.
    Stopped,
}

struct BridgingSink<'a> {
    store_handle: &'a mut crate::segment_store::SinkHandle,
    tokens: &'a JobTokens,
    rate_limiter: &'a RateLimiter,
    job_id: &'a str,
    segment_progress: Arc<AtomicU64>,
    pending: Vec<u8>,
}

impl<'a> Sink for BridgingSink<'a> {
    fn write_chunk(&mut self, chunk: &[u8], _cumulative: u64) -> SinkSignal {
        if self.tokens.should_stop() {
            return SinkSignal::Pause;
        }
        self.pending.extend_from_slice(chunk);
        while self.pending.len() as u64 >= CHUNK_ACQUIRE_CAP {
            let take = CHUNK_ACQUIRE_CAP.min(self.pending.len() as u64) as usize;
            let piece: Vec<u8> = self.pending.drain(..take).collect();
            self.rate_limiter.acquire(self.job_id, piece.len() as u64);
            if let Err(_e) = self.store_handle.write(&piece) {
                return SinkSignal::Abort;
            }
            self.segment_progress
                .fetch_add(piece.len() as u64, Ordering::Relaxed);
            if self.tokens.should_stop() {
                return SinkSignal::Pause;
            }
        }
        SinkSignal::Continue
    }
}

fn flush_tail(sink: &mut BridgingSink) -> Result<()> {
    if !sink.pending.is_empty() {
        let piece = std::mem::take(&mut sink.pending);
        sink.rate_limiter.acquire(sink.job_id, piece.len() as u64);
        sink.store_handle.write(&piece)?;
        sink.segment_progress
            .fetch_add(piece.len() as u64, Ordering::Relaxed);
    }
    Ok(())
}

/// Runs one segment to `Done`/`Failed`/`RangeRejected`/`Stopped`, retrying
/// transient transport failures with the given policy (§4.3).
pub struct Worker<'a> {
    pub transport: &'a dyn Transport,
    pub rate_limiter: &'a RateLimiter,
    pub retry_policy: RetryPolicy,
    pub job_id: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub temp_dir: std::path::PathBuf,
}

impl<'a> Worker<'a> {
    pub fn run_segment(
        &self,
        segment: &mut Segment,
        tokens: &JobTokens,
        progress: Arc<AtomicU64>,
    ) -> WorkerOutcome {
        segment.state = SegmentState::Downloading;
        loop {
            if tokens.should_stop() {
                return WorkerOutcome::Stopped;
            }

            let range_len = segment.range_len();
            let append_from = segment.bytes_written;
            let mut handle = match SegmentStore::open_segment(
                &self.temp_dir,
                segment.index,
                range_len,
                append_from,
            ) {
                Ok(h) => h,
                Err(e) => return WorkerOutcome::Failed(e),
            };

            let first = segment.start + segment.bytes_written;
            let last = if segment.end > 0 {
                Some(segment.end - 1)
            } else {
                None
            };
            let mut req = Request::get(&self.url).with_range(RangeSpec { first, last });
            req.headers = self.headers.clone();

            let mut sink = BridgingSink {
                store_handle: &mut handle,
                tokens,
                rate_limiter: self.rate_limiter,
                job_id: &self.job_id,
                segment_progress: progress.clone(),
                pending: Vec::new(),
            };

            let result = self.transport.fetch(&req, &mut sink);
            if let Err(e) = flush_tail(&mut sink) {
                return WorkerOutcome::Failed(e);
            }
            segment.bytes_written = handle.bytes_written();
            let _ = SegmentStore::flush_and_close(handle);

            match result {
                Ok(_success) => {
                    if tokens.should_stop() {
                        return WorkerOutcome::Stopped;
                    }
                    if range_len == 0 || segment.bytes_written >= range_len {
                        segment.state = SegmentState::Done;
                        return WorkerOutcome::Done;
                    }
                    // Short read without an error: loop and resume from the
                    // new offset rather than treating it as success.
                    segment.attempts += 1;
                    continue;
                }
                Err(e) => {
                    if tokens.should_stop() {
                        return WorkerOutcome::Stopped;
                    }
                    if e.kind == TransportErrorKind::RangeRejected {
                        return WorkerOutcome::RangeRejected;
                    }
                    if !e.kind.retryable() {
                        segment.state = SegmentState::Failed;
                        return WorkerOutcome::Failed(to_dlm_error(&e));
                    }
                    segment.attempts += 1;
                    let retry_kind = classify_for_retry(&e);
                    match self.retry_policy.decide(segment.attempts, retry_kind) {
                        RetryDecision::NoRetry => {
                            segment.state = SegmentState::Failed;
                            return WorkerOutcome::Failed(to_dlm_error(&e));
                        }
                        RetryDecision::RetryAfter(delay) => {
                            std::thread::sleep(delay);
                            continue;
                        }
                    }
                }
            }
        }
    }
}

fn classify_for_retry(e: &TransportError) -> RetryErrorKind {
    match e.kind {
        TransportErrorKind::Timeout => RetryErrorKind::Timeout,
        TransportErrorKind::HttpStatus(code) => retry::classify_http_status(code),
        TransportErrorKind::Resolve
        | TransportErrorKind::Connect
        | TransportErrorKind::Tls
        | TransportErrorKind::ServerClosed => RetryErrorKind::Connection,
        _ => RetryErrorKind::Other,
    }
}

fn to_dlm_error(e: &TransportError) -> DlmError {
    match e.kind {
        TransportErrorKind::HttpStatus(code) => DlmError::TransportFatal {
            status: Some(code),
            message: e.message.clone(),
        },
        TransportErrorKind::RangeRejected => DlmError::RangeRejected,
        TransportErrorKind::Cancelled => DlmError::Cancelled,
        _ => DlmError::TransportFatal {
            status: None,
            message: e.message.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_retry_maps_http_status() {
        let e = TransportError {
            kind: TransportErrorKind::HttpStatus(503),
            message: "x".into(),
        };
        assert_eq!(classify_for_retry(&e), RetryErrorKind::Throttled);
    }

    #[test]
    fn classify_retry_maps_connect() {
        let e = TransportError {
            kind: TransportErrorKind::Connect,
            message: "x".into(),
        };
        assert_eq!(classify_for_retry(&e), RetryErrorKind::Connection);
    }
}
