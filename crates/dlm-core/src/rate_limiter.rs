//! C4 RateLimiter: global and per-job token buckets enforcing an aggregate
//! byte-rate budget (§4.4). New component — the starting crate only had a
//! connection-*count* budget (`GlobalConnectionBudget`/`BudgetGuard` with a
//! drop-releases-reservation RAII shape); this reuses that RAII idiom but
//! accounts bytes/sec instead of connection slots.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One monotonic-clock token bucket. Capacity is a quarter-second's worth of
/// the configured rate (§4.4), so a burst can't exceed 250ms at full speed.
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate_bytes_per_sec: u64) -> Self {
        let capacity = (rate_bytes_per_sec as f64 * 0.25).max(1.0);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: rate_bytes_per_sec as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
    }

    /// Attempts to deduct `n` tokens; returns the wait duration needed if
    /// insufficient (None means proceed now).
    fn try_acquire(&mut self, n: f64) -> Option<Duration> {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            None
        } else if self.refill_per_sec <= 0.0 {
            // unlimited: should never reach here since unlimited buckets
            // aren't constructed, but stay safe.
            self.tokens = 0.0;
            None
        } else {
            let missing = n - self.tokens;
            self.tokens = 0.0;
            Some(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    fn set_rate(&mut self, rate_bytes_per_sec: u64) {
        self.refill();
        self.capacity = (rate_bytes_per_sec as f64 * 0.25).max(1.0);
        self.refill_per_sec = rate_bytes_per_sec as f64;
        self.tokens = self.tokens.min(self.capacity);
    }
}

struct Inner {
    global: Option<Bucket>,
    per_job: HashMap<String, Bucket>,
}

/// Global and per-job token buckets. `acquire` blocks the calling thread
/// (workers call this from their own OS thread, never the async runtime)
/// until both buckets have capacity. First-come-first-served per bucket via
/// the mutex + condvar wakeup order.
pub struct RateLimiter {
    state: Mutex<Inner>,
    cv: Condvar,
}

impl RateLimiter {
    pub fn new(global_speed_limit_bytes: u64) -> Self {
        Self {
            state: Mutex::new(Inner {
                global: if global_speed_limit_bytes == 0 {
                    None
                } else {
                    Some(Bucket::new(global_speed_limit_bytes))
                },
                per_job: HashMap::new(),
            }),
            cv: Condvar::new(),
        }
    }

    pub fn set_job_limit(&self, job_id: &str, limit_bytes_per_sec: Option<u64>) {
        let mut inner = self.state.lock().unwrap();
        match limit_bytes_per_sec {
            None | Some(0) => {
                inner.per_job.remove(job_id);
            }
            Some(rate) => {
                inner
                    .per_job
                    .entry(job_id.to_string())
                    .and_modify(|b| b.set_rate(rate))
                    .or_insert_with(|| Bucket::new(rate));
            }
        }
        self.cv.notify_all();
    }

    pub fn set_global_limit(&self, limit_bytes_per_sec: u64) {
        let mut inner = self.state.lock().unwrap();
        match limit_bytes_per_sec {
            0 => inner.global = None,
            rate => match &mut inner.global {
                Some(b) => b.set_rate(rate),
                None => inner.global = Some(Bucket::new(rate)),
            },
        }
        self.cv.notify_all();
    }

    pub fn unregister_job(&self, job_id: &str) {
        self.state.lock().unwrap().per_job.remove(job_id);
    }

    /// Deducts `n_bytes` from both the global and the job's bucket,
    /// blocking the caller until both have capacity (§4.4). A no-op when
    /// neither bucket is configured with a limit.
    pub fn acquire(&self, job_id: &str, n_bytes: u64) {
        if n_bytes == 0 {
            return;
        }
        let n = n_bytes as f64;
        loop {
            let wait = {
                let mut inner = self.state.lock().unwrap();
                let global_wait = inner.global.as_mut().and_then(|b| b.try_acquire(n));
                let job_wait = inner
                    .per_job
                    .get_mut(job_id)
                    .and_then(|b| b.try_acquire(n));
                match (global_wait, job_wait) {
                    (None, None) => return,
                    (g, j) => g.into_iter().chain(j).max(),
                }
            };
            if let Some(delay) = wait {
                // Bounded wait so a concurrent `set_*_limit` call can wake us
                // sooner than the stale delay estimate.
                let guard = self.state.lock().unwrap();
                let _ = self
                    .cv
                    .wait_timeout(guard, delay.min(Duration::from_millis(250)))
                    .unwrap();
            }
        }
    }
}
