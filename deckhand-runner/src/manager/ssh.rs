//! Remote execution over SSH
//!
//! One OpenSSH control-master connection per host, shared by every command,
//! upload and mkdir sent to that host. Host keys are verified strictly unless
//! the configuration explicitly opts out.

use deckhand_core::{DeployError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SshSettings;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};

const CONTROL_PERSIST_SECS: u64 = 600;

/// Quotes a path for a remote POSIX shell
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Connection to one remote host
pub struct SshSession {
    runner: Arc<dyn CommandRunner>,
    settings: SshSettings,
    host: String,
    control_path: PathBuf,
}

impl SshSession {
    /// Creates a session handle; the connection opens on first use
    ///
    /// # Arguments
    /// * `runner` - Executes ssh and scp
    /// * `settings` - User, key, timeouts and host-key policy
    /// * `control_dir` - Directory for the control socket
    /// * `host` - Target host
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: SshSettings,
        control_dir: &Path,
        host: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let control_path = control_dir.join(format!("{}@{}", settings.username, host));
        Self {
            runner,
            settings,
            host,
            control_path,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn options(&self) -> Vec<String> {
        let checking = if self.settings.strict_host_keys { "yes" } else { "no" };
        let mut opts = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", checking),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout.as_secs()),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}", CONTROL_PERSIST_SECS),
        ];
        if self.settings.key_path.exists() {
            opts.push("-i".to_string());
            opts.push(self.settings.key_path.to_string_lossy().to_string());
        }
        opts
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.settings.username, self.host)
    }

    /// Opens the shared connection
    pub async fn connect(&self) -> Result<()> {
        if !self.settings.strict_host_keys {
            warn!(
                "Host key verification disabled for {}; only use this on trusted networks",
                self.host
            );
        }
        if let Some(parent) = self.control_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DeployError::io(format!("Failed to create {}", parent.display()), e))?;
        }

        let spec = CommandSpec::new("ssh")
            .args(self.options())
            .arg(self.destination())
            .arg("true")
            .timeout(self.settings.connect_timeout + Duration::from_secs(5));
        self.runner.run_checked(spec).await?;
        info!("Connected to {}", self.destination());
        Ok(())
    }

    /// True while the control master is alive
    pub async fn is_connected(&self) -> bool {
        let spec = CommandSpec::new("ssh")
            .args(["-O", "check", "-o"])
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(self.destination());
        matches!(self.runner.run(spec).await, Ok(output) if output.success())
    }

    /// Runs a shell command on the host
    ///
    /// A non-zero exit is returned as output, not as an error.
    pub async fn run_command(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        debug!("[{}] {}", self.host, command);
        let spec = CommandSpec::new("ssh")
            .args(self.options())
            .arg(self.destination())
            .arg(command)
            .timeout(timeout);
        self.runner.run(spec).await
    }

    /// Uploads a local file
    pub async fn push_file(&self, local: &Path, remote: &str) -> Result<()> {
        if !local.is_file() {
            return Err(DeployError::NotFound(format!("file {}", local.display())));
        }
        let spec = CommandSpec::new("scp")
            .args(self.options())
            .arg(local.to_string_lossy())
            .arg(format!("{}:{}", self.destination(), remote))
            .timeout(Duration::from_secs(600));
        self.runner.run_checked(spec).await?;
        info!("Pushed {} to {}:{}", local.display(), self.host, remote);
        Ok(())
    }

    /// Creates a directory (and parents) on the host
    pub async fn create_remote_directory(&self, path: &str, mode: u32) -> Result<()> {
        let command = format!("mkdir -p {} && chmod {:o} {}", quote(path), mode, quote(path));
        let spec = CommandSpec::new("ssh")
            .args(self.options())
            .arg(self.destination())
            .arg(command)
            .timeout(self.settings.connect_timeout);
        self.runner.run_checked(spec).await?;
        debug!("Ensured {}:{}", self.host, path);
        Ok(())
    }

    /// Closes the shared connection
    pub async fn close(&self) -> Result<()> {
        let spec = CommandSpec::new("ssh")
            .args(["-O", "exit", "-o"])
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(self.destination());
        let output = self.runner.run(spec).await?;
        if !output.success() {
            debug!("No open connection to {}", self.host);
        }
        Ok(())
    }
}

/// Hands out one [`SshSession`] per host
pub struct SshManager {
    runner: Arc<dyn CommandRunner>,
    settings: SshSettings,
    control_dir: PathBuf,
    sessions: Mutex<HashMap<String, Arc<SshSession>>>,
}

impl SshManager {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: SshSettings, state_dir: &Path) -> Self {
        Self {
            runner,
            settings,
            control_dir: state_dir.join("ssh"),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the session for `host`, creating it on first request
    pub fn session(&self, host: &str) -> Arc<SshSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(SshSession::new(
                    self.runner.clone(),
                    self.settings.clone(),
                    &self.control_dir,
                    host,
                ))
            })
            .clone()
    }

    /// Closes every open session
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<SshSession>> = {
            let mut guard = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            if let Err(e) = session.close().await {
                warn!("Failed to close ssh session to {}: {}", session.host(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::testing::FakeRunner;

    fn manager(runner: &FakeRunner, strict: bool) -> SshManager {
        let mut settings = DeployConfig::default().ssh;
        settings.strict_host_keys = strict;
        SshManager::new(Arc::new(runner.clone()), settings, Path::new("/tmp/deckhand-test"))
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("/srv/it's"), "'/srv/it'\\''s'");
    }

    #[tokio::test]
    async fn test_strict_host_keys_by_default() {
        let runner = FakeRunner::new();
        let ssh = manager(&runner, true);
        ssh.session("acme01").run_command("uptime", Duration::from_secs(30)).await.unwrap();

        let call = &runner.calls()[0];
        assert!(call.contains("StrictHostKeyChecking=yes"));
        assert!(call.contains("ControlPath=/tmp/deckhand-test/ssh/root@acme01"));
        assert!(call.ends_with("root@acme01 uptime"));
    }

    #[tokio::test]
    async fn test_opt_out_disables_host_key_check() {
        let runner = FakeRunner::new();
        let ssh = manager(&runner, false);
        ssh.session("acme01")
            .create_remote_directory("/srv/acme01", 0o755)
            .await
            .unwrap();
        let call = &runner.calls()[0];
        assert!(call.contains("StrictHostKeyChecking=no"));
        assert!(call.ends_with("mkdir -p '/srv/acme01' && chmod 755 '/srv/acme01'"));
    }

    #[test]
    fn test_one_session_per_host() {
        let runner = FakeRunner::new();
        let ssh = manager(&runner, true);
        let a = ssh.session("acme01");
        let b = ssh.session("acme01");
        let c = ssh.session("beta02");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_push_missing_file_is_not_found() {
        let runner = FakeRunner::new();
        let ssh = manager(&runner, true);
        let err = ssh
            .session("acme01")
            .push_file(Path::new("/nonexistent/deckhand.tar"), "/tmp/x")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(runner.call_count(), 0);
    }
}
