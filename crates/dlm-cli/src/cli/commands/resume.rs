//! `dlm start <id>` – start a pending job or resume a paused one (§6 `start`).

use anyhow::Result;
use dlm_core::Brain;
use std::sync::Arc;

pub fn run_start(brain: &Arc<Brain>, id: &str) -> Result<()> {
    brain.start(&id.to_string())?;
    println!("Started job {id}");
    Ok(())
}
