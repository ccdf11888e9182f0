//! Deployment configuration
//!
//! Defines all configurable parameters for a deployment run: resource paths,
//! docker and ssh settings, backup defaults and the cron owner. Built once at
//! startup and shared by reference with every manager and phase.

use deckhand_core::Vars;
use deckhand_core::domain::customer::CustomerRecord;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Docker connection settings
#[derive(Debug, Clone)]
pub struct DockerSettings {
    /// Daemon address, exported as DOCKER_HOST
    pub socket: String,
    /// Budget for compose and pull operations
    pub timeout: Duration,
}

/// SSH connection settings
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub username: String,
    pub connect_timeout: Duration,
    pub key_path: PathBuf,
    /// Reject unknown or changed host keys
    ///
    /// Turning this off is an explicit opt-out for trusted networks only.
    pub strict_host_keys: bool,
}

/// Backup defaults
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub enabled: bool,
    pub path: PathBuf,
    pub retention_days: u32,
}

/// Deployment configuration
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Root of templates, backup scripts and SQL dumps
    pub resources_dir: PathBuf,
    /// Customer registry CSV
    pub customers_file: PathBuf,
    /// Working state (ssh control sockets)
    pub state_dir: PathBuf,
    /// Owner of the managed crontab
    pub cron_user: String,
    pub docker: DockerSettings,
    pub ssh: SshSettings,
    pub backup: BackupSettings,
}

impl DeployConfig {
    /// Creates a configuration with defaults rooted at `resources_dir`
    pub fn new(resources_dir: impl Into<PathBuf>) -> Self {
        let resources_dir = resources_dir.into();
        Self {
            customers_file: resources_dir.join("customer.csv"),
            state_dir: PathBuf::from("/var/lib/deckhand"),
            cron_user: "root".to_string(),
            docker: DockerSettings {
                socket: "unix:///var/run/docker.sock".to_string(),
                timeout: Duration::from_secs(300),
            },
            ssh: SshSettings {
                username: "root".to_string(),
                connect_timeout: Duration::from_secs(30),
                key_path: resources_dir.join("ssh").join("id_rsa"),
                strict_host_keys: true,
            },
            backup: BackupSettings {
                enabled: true,
                path: PathBuf::from("/backup"),
                retention_days: 30,
            },
            resources_dir,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - DEPLOY_RESOURCES_DIR (default: resources)
    /// - DEPLOY_CUSTOMERS_FILE (default: <resources>/customer.csv)
    /// - DEPLOY_STATE_DIR (default: /var/lib/deckhand)
    /// - DOCKER_SOCKET (default: unix:///var/run/docker.sock)
    /// - DOCKER_TIMEOUT (seconds, default: 300)
    /// - SSH_USERNAME (default: root)
    /// - SSH_TIMEOUT (seconds, default: 30)
    /// - SSH_KEY_PATH (default: <resources>/ssh/id_rsa)
    /// - SSH_STRICT_HOST_KEYS (default: true)
    /// - BACKUP_ENABLED (default: true)
    /// - BACKUP_PATH (default: /backup)
    /// - BACKUP_RETENTION_DAYS (default: 30)
    /// - CRON_USER (default: root)
    pub fn from_env() -> anyhow::Result<Self> {
        let resources_dir = std::env::var("DEPLOY_RESOURCES_DIR").unwrap_or_else(|_| "resources".to_string());
        let mut config = Self::new(resources_dir);

        if let Ok(path) = std::env::var("DEPLOY_CUSTOMERS_FILE") {
            config.customers_file = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("DEPLOY_STATE_DIR") {
            config.state_dir = PathBuf::from(path);
        }
        if let Ok(user) = std::env::var("CRON_USER") {
            config.cron_user = user;
        }

        if let Ok(socket) = std::env::var("DOCKER_SOCKET") {
            config.docker.socket = socket;
        }
        if let Some(secs) = env_parse::<u64>("DOCKER_TIMEOUT")? {
            config.docker.timeout = Duration::from_secs(secs);
        }

        if let Ok(user) = std::env::var("SSH_USERNAME") {
            config.ssh.username = user;
        }
        if let Some(secs) = env_parse::<u64>("SSH_TIMEOUT")? {
            config.ssh.connect_timeout = Duration::from_secs(secs);
        }
        if let Ok(path) = std::env::var("SSH_KEY_PATH") {
            config.ssh.key_path = PathBuf::from(path);
        }
        if let Some(strict) = env_flag("SSH_STRICT_HOST_KEYS")? {
            config.ssh.strict_host_keys = strict;
        }

        if let Some(enabled) = env_flag("BACKUP_ENABLED")? {
            config.backup.enabled = enabled;
        }
        if let Ok(path) = std::env::var("BACKUP_PATH") {
            config.backup.path = PathBuf::from(path);
        }
        if let Some(days) = env_parse::<u32>("BACKUP_RETENTION_DAYS")? {
            config.backup.retention_days = days;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.resources_dir.as_os_str().is_empty() {
            anyhow::bail!("resources_dir cannot be empty");
        }

        if self.cron_user.trim().is_empty() {
            anyhow::bail!("cron_user cannot be empty");
        }

        if self.docker.timeout.as_secs() == 0 {
            anyhow::bail!("docker timeout must be greater than 0");
        }

        if self.ssh.connect_timeout.as_secs() == 0 {
            anyhow::bail!("ssh timeout must be greater than 0");
        }

        if self.ssh.username.trim().is_empty() {
            anyhow::bail!("ssh username cannot be empty");
        }

        if !self.backup.path.is_absolute() {
            anyhow::bail!("backup path must be absolute, got {}", self.backup.path.display());
        }

        Ok(())
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.resources_dir.join("templates")
    }

    pub fn backup_scripts_dir(&self) -> PathBuf {
        self.resources_dir.join("backup_scripts")
    }

    pub fn sql_dir(&self) -> PathBuf {
        self.resources_dir.join("sql")
    }

    /// Builds the variable map a pipeline run consumes for one customer
    ///
    /// Registry columns come first; path and flag defaults fill the gaps.
    pub fn customer_vars(&self, customer: &CustomerRecord) -> Vars {
        let mut vars: Vars = customer
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        vars.insert("customer_name", customer.customer_name.clone());
        if let Some(host) = customer.host() {
            vars.insert("inventory_hostname", host);
        }
        self.apply_defaults(&mut vars);
        vars
    }

    /// Fills configuration-derived defaults into a variable map
    pub fn apply_defaults(&self, vars: &mut Vars) {
        vars.set_default("backup_path", path_str(&self.backup.path));
        vars.set_default("log_path", "/var/log");
        vars.set_default("info_path", "/info");
        vars.set_default("customer_backup_enabled", self.backup.enabled);
        vars.set_default("backup_retention_days", self.backup.retention_days);
        vars.set_default("playbook_dir", path_str(&self.resources_dir));
        vars.set_default("templates_dir", path_str(&self.templates_dir()));
        vars.set_default("backup_scripts_dir", path_str(&self.backup_scripts_dir()));
        vars.set_default("cron_user", self.cron_user.clone());
        if self.ssh.key_path.exists() {
            vars.set_default("git_ssh_key", path_str(&self.ssh.key_path));
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self::new("resources")
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a number, got '{}'", key, raw)),
        Err(_) => Ok(None),
    }
}

fn env_flag(key: &str) -> anyhow::Result<Option<bool>> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => anyhow::bail!("{} must be a boolean, got '{}'", key, raw),
        },
        Err(_) => Ok(None),
    }
}
