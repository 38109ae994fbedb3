//! `dlm pause <id>` – pause a job (§6 `pause`).

use anyhow::Result;
use dlm_core::Brain;

pub fn run_pause(brain: &Brain, id: &str) -> Result<()> {
    brain.pause(&id.to_string())?;
    println!("Pause requested for job {id}");
    Ok(())
}
