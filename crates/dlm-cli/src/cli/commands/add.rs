//! `dlm add <url>` – submit a new download job (§6 `submit`).

use anyhow::Result;
use dlm_core::model::DownloadSpec;
use dlm_core::Brain;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[allow(clippy::too_many_arguments)]
pub fn run_add(
    brain: &Arc<Brain>,
    url: &str,
    folder: PathBuf,
    filename: Option<String>,
    connections: Option<usize>,
    speed_limit_bytes: Option<u64>,
    headers: HashMap<String, String>,
    start: bool,
) -> Result<()> {
    let spec = DownloadSpec {
        url: url.to_string(),
        folder,
        filename,
        connections,
        headers,
        proxy: None,
        cookies: HashMap::new(),
        speed_limit_bytes,
    };
    let id = brain.submit(spec)?;
    println!("Added job {id} for URL: {url}");
    if start {
        brain.start(&id)?;
        println!("Started job {id}");
    }
    Ok(())
}
