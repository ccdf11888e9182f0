//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod customer;
mod phase;
mod remote;
mod run;
mod scan;

pub use customer::CustomerCommands;
pub use remote::RemoteCommands;

use anyhow::Result;
use clap::Subcommand;
use deckhand_core::Vars;
use deckhand_core::domain::pipeline::PipelineRequest;
use deckhand_core::vars::normalize_value;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the deployment pipeline for one customer
    Run {
        /// Customer name from the registry
        #[arg(long, conflicts_with = "host", required_unless_present = "host")]
        customer: Option<String>,

        /// Host of the customer
        #[arg(long)]
        host: Option<String>,

        /// Only run phases with one of these tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// First phase to run
        #[arg(long)]
        start_from: Option<String>,

        /// Last phase to run
        #[arg(long)]
        stop_at: Option<String>,

        /// Keep going after a failed phase
        #[arg(long)]
        ignore_failures: bool,

        /// Variable overrides as key=value pairs
        #[arg(short, long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },
    /// Run a single phase
    Phase {
        /// Phase name, e.g. task_02_create_dirs
        task: String,

        /// Load variables from this registry customer
        #[arg(long)]
        customer: Option<String>,

        /// Variables as key=value pairs
        #[arg(short, long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,

        /// Re-run the phase up to this many times while it fails
        #[arg(long, default_value = "0")]
        retries: u32,

        /// Seconds between retries
        #[arg(long, default_value = "5")]
        retry_delay: u64,
    },
    /// List phases with their tags
    Tasks,
    /// Customer registry management
    Customer {
        #[command(subcommand)]
        command: CustomerCommands,
    },
    /// Probe TCP ports on a host
    Scan {
        #[arg(long)]
        host: String,

        /// Ports to probe (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        ports: Vec<u16>,

        /// Per-port connect timeout in milliseconds
        #[arg(long, default_value = "500")]
        timeout_ms: u64,

        /// Maximum concurrent probes
        #[arg(long, default_value = "10")]
        workers: usize,
    },
    /// Remote execution over SSH
    Remote {
        /// Accept unknown host keys (trusted networks only)
        #[arg(long, global = true)]
        insecure_host_keys: bool,

        #[command(subcommand)]
        command: RemoteCommands,
    },
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Normalizes `--set` pairs into registry-style values
fn fields_from_pairs(pairs: Vec<(String, String)>) -> BTreeMap<String, JsonValue> {
    pairs
        .into_iter()
        .map(|(key, value)| (key, normalize_value(&value)))
        .collect()
}

fn vars_from_pairs(pairs: Vec<(String, String)>) -> Vars {
    Vars::from(fields_from_pairs(pairs))
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
///
/// # Returns
/// Whether the command succeeded
pub async fn handle_command(command: Commands, config: &Config) -> Result<bool> {
    match command {
        Commands::Run {
            customer,
            host,
            tags,
            start_from,
            stop_at,
            ignore_failures,
            set,
        } => {
            let request = PipelineRequest {
                tags,
                start_from,
                stop_at,
                ignore_failures,
                vars: vars_from_pairs(set),
            };
            run::handle_run(customer, host, request, config).await
        }
        Commands::Phase {
            task,
            customer,
            set,
            retries,
            retry_delay,
        } => phase::handle_phase(&task, customer, set, retries, retry_delay, config).await,
        Commands::Tasks => run::list_tasks(config),
        Commands::Customer { command } => customer::handle_customer_command(command, config),
        Commands::Scan {
            host,
            ports,
            timeout_ms,
            workers,
        } => scan::handle_scan(&host, &ports, timeout_ms, workers).await,
        Commands::Remote {
            insecure_host_keys,
            command,
        } => remote::handle_remote_command(command, insecure_host_keys, config).await,
    }
}
