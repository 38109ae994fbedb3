//! `dlm set-speed-limit` / `dlm set-max-concurrent` – hot-tunable knobs
//! exposed by the §6 control surface without a restart.

use anyhow::Result;
use dlm_core::Brain;
use std::sync::Arc;

pub fn run_set_speed_limit(brain: &Brain, bytes_per_sec: u64) -> Result<()> {
    brain.set_global_speed_limit(bytes_per_sec);
    if bytes_per_sec == 0 {
        println!("Global speed limit removed");
    } else {
        println!("Global speed limit set to {bytes_per_sec} bytes/sec");
    }
    Ok(())
}

pub fn run_set_max_concurrent(brain: &Arc<Brain>, n: usize) -> Result<()> {
    brain.set_max_concurrent(n);
    println!("Max concurrent jobs set to {n}");
    Ok(())
}
