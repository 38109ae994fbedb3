//! Push-model notifications to the outside world (§6 `Observer`, §9 design
//! note: replace in-process observer method calls with a broadcast channel).
//!
//! Workers and the scheduler never call into UI code directly; they publish
//! onto an [`EventBus`], and any number of subscribers (a TUI, the CLI's
//! `status --follow`, a future GUI) drain it independently. This removes the
//! reentrancy hazards of many workers calling observer methods in-process.

use crate::error::ErrorKind;
use crate::model::{JobId, JobStatus};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum Event {
    State {
        job_id: JobId,
        old: JobStatus,
        new: JobStatus,
    },
    Progress {
        job_id: JobId,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        rate_bytes_per_sec: f64,
        eta_seconds: Option<f64>,
    },
    Error {
        job_id: JobId,
        kind: ErrorKind,
        message: String,
    },
}

/// Trait form of the same three callbacks named in §6, for code that wants a
/// synchronous, object-safe sink (e.g. adapting the bus to a non-async UI
/// toolkit) instead of subscribing to the broadcast channel directly.
pub trait Observer: Send + Sync {
    fn on_state(&self, job_id: &JobId, old: JobStatus, new: JobStatus);
    fn on_progress(
        &self,
        job_id: &JobId,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        rate_bytes_per_sec: f64,
        eta_seconds: Option<f64>,
    );
    fn on_error(&self, job_id: &JobId, kind: ErrorKind, message: &str);
}

const CHANNEL_CAPACITY: usize = 1024;

/// Single-producer broadcast hub. `Brain` holds the sender side; any number
/// of subscribers call `subscribe()` for a receiver.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish is best-effort: a full channel or zero subscribers is not an
    /// error (matches the teacher's `try_send`-drop-on-backpressure idiom for
    /// progress updates — slow/absent observers never stall a download).
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn publish_state(&self, job_id: JobId, old: JobStatus, new: JobStatus) {
        self.publish(Event::State { job_id, old, new });
    }

    pub fn publish_progress(
        &self,
        job_id: JobId,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        rate_bytes_per_sec: f64,
        eta_seconds: Option<f64>,
    ) {
        self.publish(Event::Progress {
            job_id,
            downloaded_bytes,
            total_bytes,
            rate_bytes_per_sec,
            eta_seconds,
        });
    }

    pub fn publish_error(&self, job_id: JobId, kind: ErrorKind, message: String) {
        self.publish(Event::Error {
            job_id,
            kind,
            message,
        });
    }
}

/// Adapts any [`Observer`] implementation onto an [`EventBus`] subscription,
/// for callers that prefer a trait object over matching on [`Event`].
pub async fn drive_observer(bus: &EventBus, observer: impl Observer) {
    let mut rx = bus.subscribe();
    loop {
        match rx.recv().await {
            Ok(Event::State { job_id, old, new }) => observer.on_state(&job_id, old, new),
            Ok(Event::Progress {
                job_id,
                downloaded_bytes,
                total_bytes,
                rate_bytes_per_sec,
                eta_seconds,
            }) => observer.on_progress(
                &job_id,
                downloaded_bytes,
                total_bytes,
                rate_bytes_per_sec,
                eta_seconds,
            ),
            Ok(Event::Error {
                job_id,
                kind,
                message,
            }) => observer.on_error(&job_id, kind, &message),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish_state("j1".into(), JobStatus::Queued, JobStatus::Running);
        let ev = rx.recv().await.unwrap();
        match ev {
            Event::State { job_id, old, new } => {
                assert_eq!(job_id, "j1");
                assert_eq!(old, JobStatus::Queued);
                assert_eq!(new, JobStatus::Running);
            }
            _ => panic!("wrong event"),
        }
    }

    #[test]
    fn publish_without_subscriber_does_not_panic() {
        let bus = EventBus::new();
        bus.publish_progress("j1".into(), 10, Some(100), 5.0, Some(18.0));
    }
}
