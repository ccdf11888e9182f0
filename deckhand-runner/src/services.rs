//! Shared managers handed to every phase
//!
//! Built once at process start. Phases receive `&Services` and never construct
//! managers of their own, so tests can swap the command runner for a fake.

use std::sync::Arc;

use crate::config::DeployConfig;
use crate::manager::{CronManager, DockerManager, FileManager, GitManager, NetworkProbe, SshManager};
use crate::process::{CommandRunner, StandardCommandRunner};

pub struct Services {
    pub config: DeployConfig,
    pub runner: Arc<dyn CommandRunner>,
    pub docker: DockerManager,
    pub git: GitManager,
    pub cron: CronManager,
    pub files: FileManager,
    pub ssh: SshManager,
    pub network: NetworkProbe,
}

impl Services {
    /// Wires every manager to the given command runner
    pub fn new(runner: Arc<dyn CommandRunner>, config: DeployConfig) -> Self {
        let key_path = config.ssh.key_path.exists().then(|| config.ssh.key_path.clone());
        Self {
            docker: DockerManager::new(runner.clone(), config.docker.clone()),
            git: GitManager::new(runner.clone(), key_path, config.ssh.strict_host_keys),
            cron: CronManager::new(runner.clone()),
            files: FileManager::new(),
            ssh: SshManager::new(runner.clone(), config.ssh.clone(), &config.state_dir),
            network: NetworkProbe::new(),
            runner,
            config,
        }
    }

    /// Managers backed by real processes on the local host
    pub fn standard(config: DeployConfig) -> Self {
        Self::new(Arc::new(StandardCommandRunner::new()), config)
    }
}
