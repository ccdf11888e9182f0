//! Docker management
//!
//! Wraps the docker CLI for the container lifecycle the pipeline needs:
//! - listing and stopping/removing containers by name or label
//! - creating networks and volumes, tolerant of "already exists"
//! - pulling images, building and bringing compose projects up or down
//! - executing commands inside running containers

use deckhand_core::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DockerSettings;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};

/// Label docker compose puts on every container of a project
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Container selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerFilter {
    /// Substring of the container name
    Name(String),
    /// `key=value` or bare `key` label match
    Label(String),
}

impl ContainerFilter {
    fn as_arg(&self) -> String {
        match self {
            Self::Name(name) => format!("name={}", name),
            Self::Label(label) => format!("label={}", label),
        }
    }
}

/// One row of `docker ps`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Names")]
    pub name: String,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Subset of `docker network inspect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Driver")]
    pub driver: String,
    #[serde(rename = "Attachable", default)]
    pub attachable: bool,
}

/// Docker CLI wrapper
pub struct DockerManager {
    runner: Arc<dyn CommandRunner>,
    settings: DockerSettings,
}

impl DockerManager {
    /// Creates a new docker manager
    ///
    /// # Arguments
    /// * `runner` - Executes the docker CLI
    /// * `settings` - Daemon address and long-operation timeout
    pub fn new(runner: Arc<dyn CommandRunner>, settings: DockerSettings) -> Self {
        Self { runner, settings }
    }

    /// Budget for compose and pull operations
    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn docker(&self) -> CommandSpec {
        CommandSpec::new("docker").env("DOCKER_HOST", self.settings.socket.clone())
    }

    /// Lists containers, running or not
    pub async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerInfo>> {
        let spec = self
            .docker()
            .args(["ps", "-a", "--no-trunc", "--filter"])
            .arg(filter.as_arg())
            .args(["--format", "{{json .}}"]);

        let output = self.runner.run_checked(spec).await?;
        let mut containers = Vec::new();
        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<ContainerInfo>(line) {
                Ok(info) => containers.push(info),
                Err(e) => warn!("Skipping unparsable docker ps line: {} ({})", line, e),
            }
        }
        debug!("Found {} container(s) for {:?}", containers.len(), filter);
        Ok(containers)
    }

    /// Stops a container
    ///
    /// # Returns
    /// false if the container was already gone
    pub async fn stop_container(&self, name: &str) -> Result<bool> {
        let output = self.runner.run(self.docker().args(["stop", name])).await?;
        if is_missing(&output) {
            debug!("Container {} not found, nothing to stop", name);
            return Ok(false);
        }
        output.check(&self.docker().args(["stop", name]))?;
        info!("Stopped container {}", name);
        Ok(true)
    }

    /// Starts a stopped container
    pub async fn start_container(&self, name: &str) -> Result<()> {
        self.runner.run_checked(self.docker().args(["start", name])).await?;
        info!("Started container {}", name);
        Ok(())
    }

    pub async fn restart_container(&self, name: &str) -> Result<()> {
        self.runner.run_checked(self.docker().args(["restart", name])).await?;
        info!("Restarted container {}", name);
        Ok(())
    }

    /// Removes a container
    ///
    /// # Returns
    /// false if the container did not exist
    pub async fn remove_container(&self, name: &str, force: bool) -> Result<bool> {
        let mut spec = self.docker().arg("rm");
        if force {
            spec = spec.arg("-f");
        }
        spec = spec.arg(name);

        let output = self.runner.run(spec.clone()).await?;
        if is_missing(&output) {
            debug!("Container {} not found, nothing to remove", name);
            return Ok(false);
        }
        output.check(&spec)?;
        info!("Removed container {}", name);
        Ok(true)
    }

    /// Runs a shell command inside a running container
    ///
    /// # Arguments
    /// * `container` - Container name
    /// * `command` - Passed to `sh -c`
    /// * `timeout` - Budget for the command
    pub async fn exec_in_container(
        &self,
        container: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let spec = self
            .docker()
            .args(["exec", container, "sh", "-c", command])
            .timeout(timeout);
        self.runner.run_checked(spec).await
    }

    /// Inspects a network
    ///
    /// # Returns
    /// None when the network does not exist
    pub async fn network_inspect(&self, name: &str) -> Result<Option<NetworkInfo>> {
        let spec = self
            .docker()
            .args(["network", "inspect", name, "--format", "{{json .}}"]);
        let output = self.runner.run(spec.clone()).await?;
        if is_missing(&output) {
            return Ok(None);
        }
        let output = output.check(&spec)?;
        let info = serde_json::from_str::<NetworkInfo>(output.stdout.trim()).map_err(|e| {
            DeployError::ExternalCall {
                command: spec.display(),
                exit_code: 0,
                stderr: format!("unparsable network inspect output: {}", e),
            }
        })?;
        Ok(Some(info))
    }

    /// Creates a network unless it exists
    ///
    /// # Returns
    /// true if the network was created
    pub async fn create_network(&self, name: &str, driver: &str, attachable: bool) -> Result<bool> {
        if let Some(existing) = self.network_inspect(name).await? {
            if existing.driver != driver {
                warn!(
                    "Network {} exists with driver {} (requested {})",
                    name, existing.driver, driver
                );
            }
            debug!("Network {} already exists", name);
            return Ok(false);
        }

        let mut spec = self.docker().args(["network", "create", "--driver", driver]);
        if attachable {
            spec = spec.arg("--attachable");
        }
        spec = spec.arg(name);

        let output = self.runner.run(spec.clone()).await?;
        if output.stderr.contains("already exists") {
            warn!("Network already exists: {}", name);
            return Ok(false);
        }
        output.check(&spec)?;
        info!("Created network {} ({})", name, driver);
        Ok(true)
    }

    /// Removes a network
    ///
    /// # Returns
    /// false if the network did not exist
    pub async fn remove_network(&self, name: &str) -> Result<bool> {
        let spec = self.docker().args(["network", "rm", name]);
        let output = self.runner.run(spec.clone()).await?;
        if is_missing(&output) {
            return Ok(false);
        }
        output.check(&spec)?;
        info!("Removed network {}", name);
        Ok(true)
    }

    /// Lists volume names, optionally filtered by name
    pub async fn list_volumes(&self, name_filter: Option<&str>) -> Result<Vec<String>> {
        let mut spec = self.docker().args(["volume", "ls", "--format", "{{.Name}}"]);
        if let Some(filter) = name_filter {
            spec = spec.args(["--filter".to_string(), format!("name={}", filter)]);
        }
        let output = self.runner.run_checked(spec).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Creates a volume unless it exists
    pub async fn create_volume(&self, name: &str) -> Result<bool> {
        let inspect = self.runner.run(self.docker().args(["volume", "inspect", name])).await?;
        if inspect.success() {
            debug!("Volume {} already exists", name);
            return Ok(false);
        }
        self.runner
            .run_checked(self.docker().args(["volume", "create", name]))
            .await?;
        info!("Created volume {}", name);
        Ok(true)
    }

    /// Removes a volume
    pub async fn remove_volume(&self, name: &str, force: bool) -> Result<bool> {
        let mut spec = self.docker().args(["volume", "rm"]);
        if force {
            spec = spec.arg("-f");
        }
        spec = spec.arg(name);

        let output = self.runner.run(spec.clone()).await?;
        if is_missing(&output) {
            return Ok(false);
        }
        output.check(&spec)?;
        info!("Removed volume {}", name);
        Ok(true)
    }

    /// Pulls an image
    ///
    /// A registry answer of "not found" becomes [`DeployError::NotFound`].
    pub async fn pull_image(&self, image: &str, timeout: Duration) -> Result<()> {
        let spec = self.docker().args(["pull", image]).timeout(timeout);
        let output = self.runner.run(spec.clone()).await?;
        if !output.success() && image_missing(&output) {
            return Err(DeployError::NotFound(format!("image {}", image)));
        }
        output.check(&spec)?;
        info!("Pulled image {}", image);
        Ok(())
    }

    /// Builds the images of a compose project
    ///
    /// # Arguments
    /// * `dir` - Directory holding `docker-compose.yml`
    /// * `pull` - Pull newer base images
    /// * `no_cache` - Ignore the build cache
    pub async fn compose_build(&self, dir: &Path, pull: bool, no_cache: bool) -> Result<CommandOutput> {
        let mut spec = self
            .docker()
            .args(["compose", "-f", "docker-compose.yml", "build"])
            .cwd(dir)
            .timeout(self.settings.timeout);
        if pull {
            spec = spec.arg("--pull");
        }
        if no_cache {
            spec = spec.arg("--no-cache");
        }
        self.runner.run_checked(spec).await
    }

    /// Brings a compose project up with the fixed deployment flags
    pub async fn compose_up(&self, dir: &Path, project: &str, file: &str) -> Result<CommandOutput> {
        let spec = self
            .docker()
            .args(["compose", "-p", project, "-f", file, "up", "-d"])
            .args(["--remove-orphans", "--force-recreate", "--pull", "always"])
            .cwd(dir)
            .timeout(self.settings.timeout);
        self.runner.run_checked(spec).await
    }

    /// Stops and removes a compose project
    pub async fn compose_down(&self, dir: &Path, project: &str, file: &str) -> Result<CommandOutput> {
        let spec = self
            .docker()
            .args(["compose", "-p", project, "-f", file, "down", "--remove-orphans"])
            .cwd(dir)
            .timeout(self.settings.timeout);
        self.runner.run_checked(spec).await
    }
}

fn is_missing(output: &CommandOutput) -> bool {
    if output.success() {
        return false;
    }
    let stderr = output.stderr.to_lowercase();
    stderr.contains("no such") || stderr.contains("not found")
}

fn image_missing(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    stderr.contains("not found") || stderr.contains("manifest unknown") || stderr.contains("pull access denied")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::testing::FakeRunner;

    fn manager(runner: &FakeRunner) -> DockerManager {
        DockerManager::new(Arc::new(runner.clone()), DeployConfig::default().docker)
    }

    #[tokio::test]
    async fn test_list_containers_parses_json_lines() {
        let runner = FakeRunner::new();
        runner.on(
            "docker ps",
            CommandOutput::ok(concat!(
                r#"{"ID":"abc","Names":"acme-gateway","Image":"php:8.1","State":"running","Status":"Up 2 hours"}"#,
                "\n",
                r#"{"ID":"def","Names":"acme-portal","Image":"php:8.2","State":"exited","Status":"Exited (0)"}"#,
                "\n"
            )),
        );
        let docker = manager(&runner);

        let containers = docker
            .list_containers(&ContainerFilter::Name("acme".to_string()))
            .await
            .unwrap();
        assert_eq!(containers.len(), 2);
        assert!(containers[0].is_running());
        assert!(!containers[1].is_running());
        assert!(runner.calls()[0].contains("--filter name=acme"));
        assert!(runner.specs()[0]
            .env
            .contains(&("DOCKER_HOST".to_string(), "unix:///var/run/docker.sock".to_string())));
    }

    #[tokio::test]
    async fn test_create_network_existing_is_unchanged() {
        let runner = FakeRunner::new();
        runner.on(
            "network inspect",
            CommandOutput::ok(r#"{"Name":"traefik_reverse_proxy","Driver":"bridge","Attachable":true}"#),
        );
        let docker = manager(&runner);

        assert!(!docker.create_network("traefik_reverse_proxy", "bridge", true).await.unwrap());
        assert_eq!(runner.count_matching("network create"), 0);
    }

    #[tokio::test]
    async fn test_create_network_when_missing() {
        let runner = FakeRunner::new();
        runner.on(
            "network inspect",
            CommandOutput::failed(1, "Error response from daemon: network traefik not found"),
        );
        let docker = manager(&runner);

        assert!(docker.create_network("traefik", "bridge", true).await.unwrap());
        assert!(runner.calls()[1].ends_with("network create --driver bridge --attachable traefik"));
    }

    #[tokio::test]
    async fn test_remove_missing_container_is_unchanged() {
        let runner = FakeRunner::new();
        runner.on("docker rm", CommandOutput::failed(1, "Error: No such container: acme-lms"));
        let docker = manager(&runner);

        assert!(!docker.remove_container("acme-lms", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_pull_missing_image_is_not_found() {
        let runner = FakeRunner::new();
        runner.on(
            "docker pull",
            CommandOutput::failed(1, "Error response from daemon: manifest unknown"),
        );
        let docker = manager(&runner);

        let err = docker.pull_image("node:99", Duration::from_secs(300)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_compose_up_flags() {
        let runner = FakeRunner::new();
        let docker = manager(&runner);

        docker
            .compose_up(Path::new("/srv/acme01/portal/docker"), "acme-portal", "docker-compose.yml")
            .await
            .unwrap();
        let spec = &runner.specs()[0];
        assert_eq!(
            spec.display(),
            "docker compose -p acme-portal -f docker-compose.yml up -d --remove-orphans --force-recreate --pull always"
        );
        assert_eq!(spec.timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_volume_lifecycle() {
        let runner = FakeRunner::new();
        runner.on("volume inspect", CommandOutput::failed(1, "Error: No such volume: acme_db"));
        runner.on("volume ls", CommandOutput::ok("acme_db\nacme_uploads\n"));
        runner.on("volume rm", CommandOutput::failed(1, "Error: No such volume: acme_old"));
        let docker = manager(&runner);

        assert!(docker.create_volume("acme_db").await.unwrap());
        assert_eq!(
            docker.list_volumes(Some("acme")).await.unwrap(),
            vec!["acme_db", "acme_uploads"]
        );
        assert!(runner.calls()[2].ends_with("--filter name=acme"));
        assert!(!docker.remove_volume("acme_old", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_restart_and_compose_down() {
        let runner = FakeRunner::new();
        runner.on("docker start", CommandOutput::failed(1, "Error: No such container: acme-lms"));
        let docker = manager(&runner);

        assert!(docker.start_container("acme-lms").await.is_err());
        docker.restart_container("acme-portal").await.unwrap();
        docker
            .compose_down(Path::new("/srv/acme01/lms/docker"), "acme-lms", "docker-compose.yml")
            .await
            .unwrap();
        assert_eq!(
            runner.specs()[2].display(),
            "docker compose -p acme-lms -f docker-compose.yml down --remove-orphans"
        );
    }
}
