//! `dlm run` – drain the queue: start every pending job (or just one, if
//! given an id) and block, printing progress, until nothing is left running.
//!
//! `Brain` schedules on its own OS threads as soon as a job is admitted; this
//! command exists only to keep the process alive long enough to observe that
//! happen, the way the teacher's `run` loop blocked on its job queue.

use anyhow::Result;
use dlm_core::model::JobStatus;
use dlm_core::Brain;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn in_flight(status: JobStatus) -> bool {
    matches!(
        status,
        JobStatus::Pending
            | JobStatus::Probing
            | JobStatus::Queued
            | JobStatus::Running
            | JobStatus::Merging
            | JobStatus::Refreshing
    )
}

pub async fn run_scheduler(brain: &Arc<Brain>, only: Option<String>, max_concurrent: Option<usize>) -> Result<()> {
    if let Some(n) = max_concurrent {
        brain.set_max_concurrent(n);
    }

    let recovered = brain.recover_at_startup()?;
    if recovered > 0 {
        tracing::info!("recovered {recovered} job(s) from a previous run");
    }

    match &only {
        Some(id) => brain.start(id)?,
        None => {
            for job in brain.list() {
                if job.status == JobStatus::Pending {
                    brain.start(&job.id)?;
                }
            }
        }
    }

    let events = brain.events();
    let mut rx = events.subscribe();
    let progress_task = tokio::spawn(async move {
        use dlm_core::events::Event;
        while let Ok(event) = rx.recv().await {
            match event {
                Event::State { job_id, old, new } => {
                    println!("{job_id}: {old:?} -> {new:?}");
                }
                Event::Error { job_id, kind, message } => {
                    println!("{job_id}: error ({kind:?}): {message}");
                }
                Event::Progress { .. } => {}
            }
        }
    });

    loop {
        let jobs = brain.list();
        let relevant: Vec<_> = match &only {
            Some(id) => jobs.into_iter().filter(|j| &j.id == id).collect(),
            None => jobs,
        };
        if relevant.iter().all(|j| !in_flight(j.status)) {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    progress_task.abort();
    println!("Queue drained.");
    Ok(())
}
