//! External process execution
//!
//! Every external tool (docker, git, crontab, ssh, bash) is invoked through the
//! [`CommandRunner`] trait:
//! - each command carries an explicit timeout
//! - exceeding it kills the child and yields a distinct timeout error
//! - stdout/stderr are always captured and logged at debug level
//! - long-running installs can be started in the background and awaited later

use async_trait::async_trait;
use deckhand_core::{DeployError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Budget for quick CLI calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A command to execute
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    /// Command line as a single string, for logs and error messages
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Converts a non-zero exit into an [`DeployError::ExternalCall`]
    pub fn check(self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.success() {
            return Ok(self);
        }
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(DeployError::ExternalCall {
            command: spec.display(),
            exit_code: self.exit_code,
            stderr,
        })
    }
}

/// Handle to a command running in the background
///
/// The caller decides whether to poll it, await it, or let it finish on its own.
pub struct BackgroundTask {
    label: String,
    handle: JoinHandle<Result<CommandOutput>>,
}

impl BackgroundTask {
    /// Spawns a future as a background task
    pub fn spawn<F>(label: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<CommandOutput>> + Send + 'static,
    {
        Self {
            label: label.into(),
            handle: tokio::spawn(future),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the task to finish
    pub async fn wait(self) -> Result<CommandOutput> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(DeployError::Io(format!(
                "Background task '{}' did not complete: {}",
                self.label, e
            ))),
        }
    }
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion
    ///
    /// A non-zero exit is not an error here; the output is returned as-is.
    ///
    /// # Returns
    /// Captured output, or an error when the command could not be started or timed out
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput>;

    /// Runs a command and treats a non-zero exit as an error
    async fn run_checked(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec.clone()).await?;
        output.check(&spec)
    }

    /// Starts a command without waiting for it
    fn spawn_background(&self, spec: CommandSpec) -> BackgroundTask;
}

/// Runs commands on the local host with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct StandardCommandRunner;

impl StandardCommandRunner {
    pub fn new() -> Self {
        Self
    }

    async fn execute(spec: CommandSpec) -> Result<CommandOutput> {
        let cmd_line = spec.display();
        debug!("Running command: {}", cmd_line);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeployError::NotFound(format!("'{}' is not installed or not on PATH", spec.program))
            } else {
                DeployError::io(format!("Failed to start '{}'", cmd_line), e)
            }
        })?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| DeployError::io(format!("Failed to write stdin of '{}'", cmd_line), e))?;
            }
        }

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => {
                result.map_err(|e| DeployError::io(format!("Failed to wait for '{}'", cmd_line), e))?
            }
            Err(_) => {
                error!("Command timed out after {:?}: {}", spec.timeout, cmd_line);
                return Err(DeployError::Timeout {
                    command: cmd_line,
                    seconds: spec.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if !stdout.trim().is_empty() {
            debug!("{} stdout: {}", spec.program, stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", spec.program, stderr.trim());
        }
        if exit_code != 0 {
            debug!("Command exited with {}: {}", exit_code, cmd_line);
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

#[async_trait]
impl CommandRunner for StandardCommandRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        Self::execute(spec).await
    }

    fn spawn_background(&self, spec: CommandSpec) -> BackgroundTask {
        let label = spec.display();
        BackgroundTask::spawn(label, Self::execute(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_display() {
        let spec = CommandSpec::new("docker")
            .args(["compose", "up"])
            .arg("-d")
            .timeout_secs(300);
        assert_eq!(spec.display(), "docker compose up -d");
        assert_eq!(spec.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_check_prefers_stderr() {
        let spec = CommandSpec::new("git").arg("fetch");
        let err = CommandOutput {
            stdout: "out".to_string(),
            stderr: "fatal: no remote".to_string(),
            exit_code: 128,
        }
        .check(&spec)
        .unwrap_err();
        assert!(err.to_string().contains("fatal: no remote"));
        assert!(err.to_string().contains("128"));
    }

    #[tokio::test]
    async fn test_standard_runner_captures_output() {
        let runner = StandardCommandRunner::new();
        let output = runner
            .run(CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_standard_runner_feeds_stdin() {
        let runner = StandardCommandRunner::new();
        let output = runner
            .run_checked(CommandSpec::new("cat").stdin("line one\n"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "line one\n");
    }

    #[tokio::test]
    async fn test_standard_runner_timeout() {
        let runner = StandardCommandRunner::new();
        let err = runner
            .run(CommandSpec::new("sleep").arg("5").timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let runner = StandardCommandRunner::new();
        let err = runner
            .run(CommandSpec::new("deckhand-no-such-binary"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_background_task_can_be_awaited() {
        let runner = StandardCommandRunner::new();
        let task = runner.spawn_background(CommandSpec::new("sh").args(["-c", "echo done"]));
        assert_eq!(task.label(), "sh -c echo done");
        let output = task.wait().await.unwrap();
        assert_eq!(output.stdout.trim(), "done");
    }
}
