use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "attempt-runner")]
#[command(about = "Concurrent multi-stage attempt orchestrator")]
#[command(long_about = "Runs a fixed pool of workers that each drive attempts through a staged \
                       workflow (acquire, code, verify, challenge and submit, post-success) until a \
                       target number of successes or the attempt budget is reached.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a run against the configured backend
    Run {
        /// Number of concurrent workers
        #[arg(long, help = "Worker pool size (defaults to run.workers from settings)")]
        workers: Option<usize>,
        /// Number of successes to collect
        #[arg(long, help = "Stop once this many successes are recorded")]
        target: Option<u64>,
        /// Global attempt budget
        #[arg(long, allow_hyphen_values = true, help = "Attempt budget, default max(target*4, target+10)")]
        max_attempts: Option<i64>,
        /// Structured event log location
        #[arg(long, help = "JSONL event log path (default logs/metrics.<timestamp>.jsonl)")]
        metrics_file: Option<PathBuf>,
        /// Success artifact location
        #[arg(long, help = "Success artifact path (default output/successes_<timestamp>_<target>.txt)")]
        output_file: Option<PathBuf>,
        /// Keep the resource of a successful attempt
        #[arg(long, action = clap::ArgAction::Set, help = "true to keep resources of successful attempts")]
        keep_success_resource: Option<bool>,
        /// Settings file to load
        #[arg(long, help = "Settings file (default attempt-runner.toml)")]
        config: Option<PathBuf>,
    },
    /// Write the default settings file
    InitConfig {
        /// Where to write the settings
        #[arg(long, default_value = "attempt-runner.toml", help = "Destination of the settings file")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long, help = "Overwrite the settings file if it already exists")]
        force: bool,
    },
}
