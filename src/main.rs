//! Main entry point for the xhs-crawler CLI

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use xhs_crawler::cli::{Cli, CommandOutcome, Commands};
use xhs_crawler::shutdown::{self, StopSignal};

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("xhs_crawler=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // Install global stop signal and Ctrl+C handler
    let stop = StopSignal::shared();
    shutdown::set_global_stop(stop.clone());
    shutdown::install_ctrl_c_handler(stop.clone());

    let result = match cli.command {
        Commands::Run(ref args) => args
            .execute(&cli, stop.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Progress(ref cmd) => cmd
            .execute(&cli)
            .await
            .map(|()| CommandOutcome::Success)
            .map_err(|e| anyhow::anyhow!(e)),
    };

    match result {
        Ok(outcome) => {
            let code = outcome.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
