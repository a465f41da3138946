//! Progress subcommand: inspect, list, verify and reset the progress file

use super::{Cli, CliError, OutputFormat};
use crate::resume::{ProgressSnapshot, ProgressStats, ProgressStatus, ProgressStore};
use clap::Parser;
use serde_json::json;
use std::path::Path;

/// Progress command for inspecting resume state
#[derive(Parser, Debug)]
pub struct ProgressCommand {
    /// What to do with the progress file
    #[command(subcommand)]
    pub action: ProgressAction,
}

/// Progress actions
#[derive(clap::Subcommand, Debug)]
pub enum ProgressAction {
    /// Show counts per status
    Stats,

    /// List items, optionally filtered by status
    List {
        /// pending, in-progress, completed or failed
        #[arg(long)]
        status: Option<ProgressStatus>,
    },

    /// Check the file parses and every record is consistent
    Verify,

    /// Forget all recorded progress
    Clear,
}

impl ProgressCommand {
    /// Execute the progress command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let path = cli.progress_file.as_path();
        match &self.action {
            ProgressAction::Stats => show_stats(path, cli.output_format),
            ProgressAction::List { status } => list(path, *status, cli.output_format),
            ProgressAction::Verify => verify(path),
            ProgressAction::Clear => clear(path),
        }
    }
}

/// Read-only view of the progress file. A corrupt file is an error and stays
/// where it is.
fn inspect(path: &Path) -> Result<ProgressSnapshot, CliError> {
    if !path.exists() {
        return Ok(ProgressSnapshot::new());
    }
    Ok(ProgressSnapshot::read_strict(path)?)
}

fn show_stats(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let snapshot = inspect(path)?;
    let stats = ProgressStats::of(&snapshot);
    let (created_at, updated_at, cleared_at) =
        (snapshot.created_at, snapshot.updated_at, snapshot.cleared_at);

    match format {
        OutputFormat::Json => {
            let output = json!({
                "path": path.display().to_string(),
                "pending": stats.pending,
                "in_progress": stats.in_progress,
                "completed": stats.completed,
                "failed": stats.failed,
                "total": stats.total(),
                "created_at": created_at,
                "updated_at": updated_at,
                "cleared_at": cleared_at,
            });
            println!("{}", serde_json::to_string(&output)?);
        }
        OutputFormat::Human => {
            println!("Progress file: {}", path.display());
            println!("  Completed:   {}", stats.completed);
            println!("  Failed:      {}", stats.failed);
            println!("  Pending:     {}", stats.pending);
            println!("  In progress: {}", stats.in_progress);
            println!("  Total:       {}", stats.total());
            println!("  Created:     {}", created_at.to_rfc3339());
            println!("  Updated:     {}", updated_at.to_rfc3339());
            if let Some(cleared_at) = cleared_at {
                println!("  Cleared:     {}", cleared_at.to_rfc3339());
            }
        }
    }
    Ok(())
}

fn list(path: &Path, status: Option<ProgressStatus>, format: OutputFormat) -> Result<(), CliError> {
    let snapshot = inspect(path)?;
    let records: Vec<_> = snapshot
        .records
        .iter()
        .filter(|(_, record)| status.map_or(true, |s| record.status == s))
        .collect();

    match format {
        OutputFormat::Json => {
            let output: Vec<_> = records
                .iter()
                .map(|(fingerprint, record)| json!({ "fingerprint": fingerprint, "record": record }))
                .collect();
            println!("{}", serde_json::to_string(&output)?);
        }
        OutputFormat::Human => {
            for (fingerprint, record) in &records {
                match &record.failure_reason {
                    Some(reason) => println!(
                        "{fingerprint}\t{}\t{} attempt(s)\t{reason}",
                        record.status, record.attempts
                    ),
                    None => println!(
                        "{fingerprint}\t{}\t{} attempt(s)",
                        record.status, record.attempts
                    ),
                }
            }
            println!("{} item(s)", records.len());
        }
    }
    Ok(())
}

fn verify(path: &Path) -> Result<(), CliError> {
    if !path.exists() {
        println!("No progress file at {}, nothing to verify", path.display());
        return Ok(());
    }

    match ProgressSnapshot::read_strict(path).and_then(|snapshot| {
        snapshot.validate()?;
        Ok(snapshot)
    }) {
        Ok(snapshot) => {
            println!(
                "Valid progress file: {} ({} record(s), schema v{})",
                path.display(),
                snapshot.records.len(),
                snapshot.schema_version
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Invalid progress file {}: {e}", path.display());
            Err(CliError::ProgressError(e))
        }
    }
}

fn clear(path: &Path) -> Result<(), CliError> {
    let store = ProgressStore::load(path)?;
    let before = store.stats().total();
    store.clear()?;
    println!("Cleared {before} record(s) from {}", path.display());
    Ok(())
}
