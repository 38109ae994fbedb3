//! CLI for the DLM download manager.

mod commands;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dlm_core::config;
use dlm_core::persistence::JobsIndex;
use dlm_core::transport::CurlTransport;
use dlm_core::Brain;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use commands::{
    run_add, run_cancel, run_checksum, run_pause, run_remove, run_scheduler, run_set_max_concurrent,
    run_set_speed_limit, run_start, run_status,
};

/// Top-level CLI for the DLM download manager.
#[derive(Debug, Parser)]
#[command(name = "dlm")]
#[command(about = "DLM: segmented download manager engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Submit a new download job.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Directory where the file will be saved (default: current directory).
        #[arg(long, value_name = "DIR")]
        download_dir: Option<PathBuf>,
        /// Override the filename derived from the URL/server response.
        #[arg(long)]
        filename: Option<String>,
        /// Number of parallel connections for this job (default: engine config).
        #[arg(long)]
        connections: Option<usize>,
        /// Cap this job's byte rate (bytes/sec). 0 or omitted = unlimited.
        #[arg(long, value_name = "BYTES")]
        speed_limit: Option<u64>,
        /// Extra request header as `Key: Value`. May be given multiple times.
        #[arg(long = "header", value_name = "KEY: VALUE")]
        headers: Vec<String>,
        /// Start the job immediately after submitting it.
        #[arg(long)]
        start: bool,
    },

    /// Start a pending job, or resume a paused one.
    Start {
        /// Job identifier.
        id: String,
    },

    /// Run the scheduler until every admitted job reaches a terminal state.
    Run {
        /// Only drive this job id; default is every currently pending job.
        id: Option<String>,
        /// Override the engine's max-concurrent-jobs for this run.
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
    },

    /// Show status of all jobs.
    Status,

    /// Pause a job by ID. The job stops at its next checkpoint and frees its slot.
    Pause {
        /// Job identifier.
        id: String,
    },

    /// Cancel a job by ID. Reachable from any non-terminal state.
    Cancel {
        /// Job identifier.
        id: String,
    },

    /// Remove a job by ID.
    Remove {
        /// Job identifier.
        id: String,
        /// Also delete the job's temp directory and partial/final files.
        #[arg(long)]
        delete_files: bool,
    },

    /// Set the aggregate byte-rate budget across all jobs. 0 = unlimited.
    SetSpeedLimit {
        /// Bytes per second.
        bytes_per_sec: u64,
    },

    /// Set how many jobs the scheduler admits to the active set at once.
    SetMaxConcurrent {
        /// New limit (clamped to [1, 64]).
        n: usize,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: String,
    },
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once(':')
        .with_context(|| format!("invalid --header {raw:?}, expected KEY: VALUE"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn bootstrap() -> Result<Arc<Brain>> {
    let cfg = config::load_or_init()?;
    tracing::debug!("loaded config: {:?}", cfg);
    let index = Arc::new(JobsIndex::open_default()?);
    let transport: Arc<dyn dlm_core::transport::Transport> = Arc::new(CurlTransport::default());
    Ok(Arc::new(Brain::new(cfg, transport, index, None)))
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let brain = bootstrap()?;

        match cli.command {
            CliCommand::Add {
                url,
                download_dir,
                filename,
                connections,
                speed_limit,
                headers,
                start,
            } => {
                let folder = download_dir
                    .or_else(|| std::env::current_dir().ok())
                    .unwrap_or_else(|| PathBuf::from("."));
                let mut header_map: HashMap<String, String> = HashMap::new();
                for raw in &headers {
                    let (k, v) = parse_header(raw)?;
                    header_map.insert(k, v);
                }
                let speed_limit = speed_limit.filter(|&b| b > 0);
                run_add(&brain, &url, folder, filename, connections, speed_limit, header_map, start)?;
            }
            CliCommand::Start { id } => run_start(&brain, &id)?,
            CliCommand::Run { id, jobs } => run_scheduler(&brain, id, jobs).await?,
            CliCommand::Status => run_status(&brain)?,
            CliCommand::Pause { id } => run_pause(&brain, &id)?,
            CliCommand::Cancel { id } => run_cancel(&brain, &id)?,
            CliCommand::Remove { id, delete_files } => run_remove(&brain, &id, delete_files)?,
            CliCommand::SetSpeedLimit { bytes_per_sec } => run_set_speed_limit(&brain, bytes_per_sec)?,
            CliCommand::SetMaxConcurrent { n } => {
                if n == 0 {
                    bail!("--n must be at least 1");
                }
                run_set_max_concurrent(&brain, n)?;
            }
            CliCommand::Checksum { path } => run_checksum(std::path::Path::new(&path))?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
