//! `dlm remove <id>` – remove a job, optionally deleting its files (§6 `remove`).

use anyhow::Result;
use dlm_core::Brain;

pub fn run_remove(brain: &Brain, id: &str, delete_files: bool) -> Result<()> {
    brain.remove(&id.to_string(), delete_files)?;
    println!("Removed job {id}");
    Ok(())
}
