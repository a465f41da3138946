//! CLI command implementations

pub mod error;
pub mod progress;
pub mod run;

pub use error::CliError;
pub use progress::ProgressCommand;
pub use run::RunArgs;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Default location of the progress file, next to the crawled data.
pub const DEFAULT_PROGRESS_FILE: &str = "datas/.progress.json";

/// Xiaohongshu batch crawler
#[derive(Parser, Debug)]
#[command(name = "xhs-crawler")]
#[command(about = "Rate-limited, resumable batch crawler for the Xiaohongshu web API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Progress file used to resume interrupted runs
    #[arg(long, global = true, env = "XHS_PROGRESS_FILE", default_value = DEFAULT_PROGRESS_FILE)]
    pub progress_file: PathBuf,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl every item listed in a file
    Run(RunArgs),

    /// Inspect or reset the progress file
    Progress(ProgressCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Finished normally, possibly with failed items
    Success,
    /// The batch stopped on an auth or fatal failure
    Aborted,
}

impl CommandOutcome {
    /// Process exit code
    pub fn exit_code(self) -> i32 {
        match self {
            CommandOutcome::Success => 0,
            CommandOutcome::Aborted => 2,
        }
    }
}
