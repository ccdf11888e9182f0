//! Deckhand CLI
//!
//! Command-line entry point for customer deployments. Every command prints a
//! single JSON object to stdout and exits 0 on success, 1 on failure. Logs go
//! to stderr.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(about = "Per-customer Docker deployment pipeline", long_about = None)]
struct Cli {
    /// Customer registry CSV
    #[arg(long, env = "DEPLOY_CUSTOMERS_FILE")]
    customers_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "deckhand=debug" } else { "deckhand=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match run(cli).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            output::print_error(&e);
            1
        }
    };
    debug!("Exiting with code {}", code);
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<bool> {
    let config = Config::load(cli.customers_file)?;
    handle_command(cli.command, &config).await
}
