//! Remote execution command handlers
//!
//! Every subcommand opens (or reuses) the control-master connection to the
//! host and closes it before printing the result.

use anyhow::{Context, Result};
use clap::Subcommand;
use deckhand_runner::manager::SshSession;
use deckhand_runner::services::Services;
use serde_json::{Value as JsonValue, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::config::Config;
use crate::output::{print_with_status, report_status};

/// Remote subcommands
#[derive(Subcommand)]
pub enum RemoteCommands {
    /// Run a shell command on a host
    Run {
        #[arg(long)]
        host: String,

        /// Command timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Upload a local file
    Push {
        #[arg(long)]
        host: String,

        src: PathBuf,

        dest: String,
    },
    /// Create a directory (and parents)
    Mkdir {
        #[arg(long)]
        host: String,

        path: String,

        /// Octal mode
        #[arg(long, default_value = "755")]
        mode: String,
    },
}

impl RemoteCommands {
    fn host(&self) -> &str {
        match self {
            RemoteCommands::Run { host, .. } => host,
            RemoteCommands::Push { host, .. } => host,
            RemoteCommands::Mkdir { host, .. } => host,
        }
    }
}

/// Handle remote commands
///
/// # Arguments
/// * `command` - The remote command to execute
/// * `insecure_host_keys` - Opt out of strict host-key checking
/// * `config` - The CLI configuration
pub async fn handle_remote_command(
    command: RemoteCommands,
    insecure_host_keys: bool,
    config: &Config,
) -> Result<bool> {
    let mut deploy = config.deploy.clone();
    if insecure_host_keys {
        warn!("Strict host key checking disabled by --insecure-host-keys");
        deploy.ssh.strict_host_keys = false;
    }
    let services = Services::standard(deploy);
    let session = services.ssh.session(command.host());

    let result = execute(&session, command).await;
    services.ssh.close_all().await;

    let (success, body) = result?;
    report_status(success, &format!("remote {}", session.host()));
    print_with_status(success, &body)
}

async fn execute(session: &SshSession, command: RemoteCommands) -> Result<(bool, JsonValue)> {
    session.connect().await?;

    match command {
        RemoteCommands::Run { timeout, command, .. } => {
            let line = command.join(" ");
            let output = session
                .run_command(&line, Duration::from_secs(timeout))
                .await?;
            Ok((
                output.success(),
                json!({
                    "host": session.host(),
                    "command": line,
                    "exit_code": output.exit_code,
                    "stdout": output.stdout,
                    "stderr": output.stderr,
                }),
            ))
        }
        RemoteCommands::Push { src, dest, .. } => {
            session.push_file(&src, &dest).await?;
            Ok((
                true,
                json!({ "host": session.host(), "src": src, "dest": dest }),
            ))
        }
        RemoteCommands::Mkdir { path, mode, .. } => {
            let mode = u32::from_str_radix(&mode, 8)
                .with_context(|| format!("invalid octal mode '{}'", mode))?;
            session.create_remote_directory(&path, mode).await?;
            Ok((
                true,
                json!({ "host": session.host(), "path": path, "mode": format!("{:o}", mode) }),
            ))
        }
    }
}
