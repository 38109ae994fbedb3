//! `dlm cancel <id>` – cancel a job (§6 `cancel`).

use anyhow::Result;
use dlm_core::Brain;

pub fn run_cancel(brain: &Brain, id: &str) -> Result<()> {
    brain.cancel(&id.to_string())?;
    println!("Cancelled job {id}");
    Ok(())
}
