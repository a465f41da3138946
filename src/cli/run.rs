//! Run command: crawl a list of items through the batch executor

use super::{Cli, CliError, CommandOutcome, OutputFormat};
use crate::executor::config::{
    DEFAULT_BURST_CAPACITY, DEFAULT_MAX_ATTEMPTS, DEFAULT_RATE_PER_SECOND,
    DEFAULT_REQUEST_TIMEOUT_SECS, MAX_ACQUIRE_TIMEOUT_SECS, MAX_CONCURRENCY,
};
use crate::executor::{BatchConfig, BatchExecutor, BatchResult, SettledEvent};
use crate::metrics::init_metrics;
use crate::remote::signer::DEFAULT_SIGNER_TIMEOUT_SECS;
use crate::remote::{CommandSigner, HttpCaller, Signer, StaticSigner, DEFAULT_BASE_URL};
use crate::resume::ProgressStore;
use crate::shutdown::SharedStop;
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Parse a positive request rate
fn parse_rate(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if !(value.is_finite() && value > 0.0) {
        return Err("rate must be greater than 0".to_string());
    }
    Ok(value)
}

/// Run command arguments
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// File with one note URL or id per line; blank lines and `#` comments are ignored
    pub input: PathBuf,

    /// Requests per second
    #[arg(long, env = "XHS_RATE_LIMIT", default_value_t = DEFAULT_RATE_PER_SECOND, value_parser = parse_rate)]
    pub rate_limit: f64,

    /// Token bucket burst capacity
    #[arg(long, default_value_t = DEFAULT_BURST_CAPACITY, value_parser = clap::value_parser!(u32).range(1..))]
    pub burst: u32,

    /// Attempts per item for transient and throttled failures (range: 1-20)
    #[arg(long, env = "XHS_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Per-request timeout in seconds
    #[arg(long, env = "XHS_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Give up on a rate limiter token after this many seconds (max: 86400)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_ACQUIRE_TIMEOUT_SECS))]
    pub acquire_timeout: Option<u64>,

    /// Number of concurrent workers (max: 32)
    #[arg(long, env = "XHS_CONCURRENCY", default_value = "1", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Skip items completed by earlier runs and record progress
    #[arg(long, env = "XHS_ENABLE_RESUME", default_value_t = true, action = ArgAction::Set)]
    pub resume: bool,

    /// Session cookie string
    #[arg(long, env = "XHS_COOKIES", default_value = "", hide_env_values = true)]
    pub cookies: String,

    /// External program that signs requests (reads JSON on stdin, prints headers as JSON)
    #[arg(long, env = "XHS_SIGNER")]
    pub signer: Option<PathBuf>,

    /// Argument passed to the signer program (repeatable)
    #[arg(long = "signer-arg", allow_hyphen_values = true)]
    pub signer_args: Vec<String>,

    /// Seconds allowed per signer invocation
    #[arg(long, default_value_t = DEFAULT_SIGNER_TIMEOUT_SECS)]
    pub signer_timeout: u64,

    /// API host
    #[arg(long, env = "XHS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Append completed responses as JSON lines to this file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl RunArgs {
    /// Batch settings described by the arguments.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::default()
            .with_rate(self.rate_limit, self.burst)
            .with_max_attempts(self.max_attempts)
            .with_request_timeout(Duration::from_secs(self.timeout))
            .with_acquire_timeout(self.acquire_timeout.map(Duration::from_secs))
            .with_concurrency(self.concurrency)
            .with_resume(self.resume)
    }

    /// Execute the run command
    pub async fn execute(&self, cli: &Cli, stop: SharedStop) -> Result<CommandOutcome, CliError> {
        let config = self.batch_config();
        config.validate()?;

        let items = read_items(&self.input)?;
        if items.is_empty() {
            warn!(input = %self.input.display(), "No items to process");
        }

        if let Some(addr) = self.metrics_addr {
            init_metrics(addr).await?;
        }

        let caller = HttpCaller::new(
            self.base_url.clone(),
            self.build_signer(),
            self.cookies.clone(),
            Duration::from_secs(self.timeout),
        )
        .map_err(|e| CliError::HttpClientError(e.to_string()))?;

        let progress = create_progress_bar(items.len() as u64);
        let mut executor = BatchExecutor::new().with_stop(stop).with_on_settled({
            let progress = progress.clone();
            move |event: &SettledEvent<'_>| {
                progress.set_message(event.fingerprint.to_string());
                progress.inc(1);
            }
        });
        if self.resume {
            let store = ProgressStore::load(&cli.progress_file)?;
            executor = executor.with_progress_store(Arc::new(store));
        }

        info!(
            items = items.len(),
            rate = config.rate_per_second,
            concurrency = config.concurrency,
            resume = config.resume_enabled,
            "Starting crawl"
        );

        let result = executor.run(items, &caller, &config).await;
        progress.finish_and_clear();
        let result = result?;

        if let Some(path) = &self.output {
            let written = append_results(path, &result)?;
            info!(written, output = %path.display(), "Results written");
        }

        match cli.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string(&summary_json(&result))?),
            OutputFormat::Human => println!("{}", result.format_report()),
        }

        if let Some(abort) = &result.abort {
            error!(%abort, "Batch aborted");
            return Ok(CommandOutcome::Aborted);
        }
        Ok(CommandOutcome::Success)
    }

    fn build_signer(&self) -> Arc<dyn Signer> {
        match &self.signer {
            Some(program) => Arc::new(
                CommandSigner::new(program.clone(), self.signer_args.clone())
                    .with_timeout(Duration::from_secs(self.signer_timeout)),
            ),
            None => Arc::new(StaticSigner::with_cookies(self.cookies.clone())),
        }
    }
}

/// Read one item per line, skipping blank lines and `#` comments.
pub fn read_items(path: &Path) -> Result<Vec<String>, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CliError::InvalidArgument(format!("cannot read item list {}: {e}", path.display()))
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn append_results(path: &Path, result: &BatchResult<Value>) -> Result<usize, CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut writer = std::io::BufWriter::new(file);
    let mut written = 0usize;
    for (fingerprint, data) in result.values() {
        let line = json!({ "fingerprint": fingerprint, "data": data });
        serde_json::to_writer(&mut writer, &line)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

fn summary_json<T>(result: &BatchResult<T>) -> Value {
    let failures: Vec<Value> = result
        .failures()
        .map(|outcome| {
            json!({
                "fingerprint": outcome.fingerprint,
                "kind": outcome.kind,
                "attempts": outcome.attempts,
                "reason": outcome.reason,
            })
        })
        .collect();

    json!({
        "completed": result.completed,
        "failed": result.failed,
        "skipped": result.skipped,
        "not_attempted": result.not_attempted,
        "aborted": result.abort.as_ref().map(|a| a.to_string()),
        "cancelled": result.cancelled,
        "elapsed_secs": result.elapsed.as_secs_f64(),
        "failures": failures,
    })
}

fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => warn!(error = %e, "Invalid progress bar template"),
    }
    pb
}
