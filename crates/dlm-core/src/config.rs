use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Engine-wide configuration, loaded once at startup from
/// `~/.config/dlm/config.toml`.
///
/// Hot-tunable knobs (`global_speed_limit_bytes`, `max_concurrent_jobs`) only
/// seed the corresponding atomics on [`crate::scheduler::Brain`] and
/// [`crate::rate_limiter::RateLimiter`] at construction time; changing this
/// struct after boot has no effect. Use the control surface
/// (`set_global_speed_limit`/`set_max_concurrent`) for runtime changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of jobs the scheduler admits to the active set at once.
    pub max_concurrent_jobs: usize,
    /// Maximum connections (workers) spawned for a single job.
    pub max_connections_per_job: usize,
    /// Floor for adaptive segment counts.
    pub min_segments: usize,
    /// Ceiling for adaptive segment counts.
    pub max_segments: usize,
    /// Aggregate byte-rate budget across all jobs. 0 = unlimited.
    pub global_speed_limit_bytes: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Directory new jobs are placed in when the caller doesn't specify one.
    pub download_dir: PathBuf,
    pub segment_size_hint_bytes: u64,
    pub max_worker_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_connections_per_job: 8,
            min_segments: 4,
            max_segments: 16,
            global_speed_limit_bytes: 0,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            download_dir: dirs_fallback_download_dir(),
            segment_size_hint_bytes: 4 * 1024 * 1024,
            max_worker_retries: 10,
            retry_base_delay_ms: 250,
            retry_max_delay_secs: 30,
        }
    }
}

fn dirs_fallback_download_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join("Downloads")
    } else {
        PathBuf::from("./downloads")
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlm")?;
    Ok(xdg_dirs.get_state_home())
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!(path = %path.display(), "created default config");
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
