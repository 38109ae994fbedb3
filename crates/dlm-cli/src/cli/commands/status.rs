//! `dlm status` – show status of all jobs (§6 `list`).

use anyhow::Result;
use dlm_core::Brain;
use std::sync::Arc;

pub fn run_status(brain: &Arc<Brain>) -> Result<()> {
    let mut jobs = brain.list();
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    println!("{:<12} {:<11} {:>12} {:>6}  {}", "ID", "STATE", "SIZE", "PROG", "URL");
    for job in jobs {
        let size_str = job
            .total_size
            .map(|s| format!("{s}"))
            .unwrap_or_else(|| "-".to_string());
        let pct = match job.total_size {
            Some(total) if total > 0 => format!("{:.0}%", job.downloaded_bytes as f64 / total as f64 * 100.0),
            _ => "-".to_string(),
        };
        println!(
            "{:<12} {:<11} {:>12} {:>6}  {}",
            job.id,
            format!("{:?}", job.status).to_lowercase(),
            size_str,
            pct,
            job.url
        );
        if let Some((kind, status, message)) = &job.last_error {
            println!("    last error: {kind:?} (status={status:?}): {message}");
        }
    }
    Ok(())
}
