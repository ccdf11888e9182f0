//! Phase 12: bring customer stacks up
//!
//! Each flagged project is started as compose project `<containers>-<name>`.
//! `compose up` is retried (`max_retries`, `retry_delay`) because registry
//! pulls and port handoffs are flaky right after a build.

use async_trait::async_trait;
use deckhand_core::domain::project::{resolve_projects, ProjectDescriptor};
use deckhand_core::{DeployError, Outcome, Steps, Vars};
use std::time::Duration;
use tracing::{info, warn};

use crate::manager::docker::COMPOSE_PROJECT_LABEL;
use crate::manager::ContainerFilter;
use crate::phases::customer_root;
use crate::retry::{retry, RetryPolicy};
use crate::services::Services;
use crate::task::Phase;

const COMPOSE_FILE: &str = "docker-compose.yml";

pub struct DeployContainersPhase;

impl DeployContainersPhase {
    async fn deploy(project: &ProjectDescriptor, vars: &Vars, services: &Services, policy: RetryPolicy) -> Outcome {
        let containers = vars.str_or("customer_containers", "");
        let project_name = format!("{}-{}", containers, project.name);
        let compose_dir = customer_root(vars).join(&project.folder).join("docker");
        let compose_file = compose_dir.join(COMPOSE_FILE);

        if !compose_file.is_file() {
            return Outcome::failed(DeployError::NotFound(format!(
                "docker compose file {}",
                compose_file.display()
            )));
        }

        info!("Deploying containers for {} (project: {})", project.name, project_name);
        let label = format!("deploy {}", project_name);
        let retried = retry(policy, &label, |attempt| {
            info!("Deploy attempt {}/{} for {}", attempt, policy.max_attempts, project.name);
            services.docker.compose_up(&compose_dir, &project_name, COMPOSE_FILE)
        })
        .await;

        if let Err(e) = retried.result {
            return Outcome::failed(e)
                .with("attempts", retried.attempts)
                .with("max_retries_reached", retried.max_retries_reached);
        }

        let filter = ContainerFilter::Label(format!("{}={}", COMPOSE_PROJECT_LABEL, project_name));
        let names: Vec<String> = match services.docker.list_containers(&filter).await {
            Ok(list) => list.into_iter().map(|c| c.name).collect(),
            Err(e) => {
                warn!("Could not list containers for {}: {}", project_name, e);
                Vec::new()
            }
        };

        Outcome::changed(format!(
            "Successfully deployed {} containers for {}",
            names.len(),
            project.name
        ))
        .with("project_name", &project_name)
        .with("containers_count", names.len())
        .with("containers", &names)
        .with("attempts", retried.attempts)
    }
}

#[async_trait]
impl Phase for DeployContainersPhase {
    fn name(&self) -> &'static str {
        "task_12_deploy_containers"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["deploy", "docker"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "project_path", "inventory_hostname", "customer_containers"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let max_retries = u32::try_from(vars.get_u64("max_retries").unwrap_or(3)).unwrap_or(u32::MAX);
        let delay = Duration::from_secs(vars.get_u64("retry_delay").unwrap_or(10));
        let policy = RetryPolicy::new(max_retries, delay);

        let mut steps = Steps::new();
        let mut deployed = 0;
        for project in resolve_projects(vars) {
            if !project.update {
                steps.record(&project.name, Outcome::skipped(format!("Update flag is false for {}", project.name)));
                continue;
            }
            let outcome = Self::deploy(&project, vars, services, policy).await;
            if outcome.is_changed() {
                deployed += 1;
            }
            steps.record(&project.name, outcome);
        }

        steps
            .finish(format!("Deployed {} projects", deployed))
            .with("deployed_count", deployed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests_support::{fs_services, fs_vars};
    use deckhand_core::vars::normalize_value;
    use crate::process::CommandOutput;
    use crate::task::execute_phase;
    use crate::testing::FakeRunner;
    use tempfile::TempDir;

    fn with_compose(tmp: &TempDir, folder: &str) {
        let dir = tmp.path().join("projects/acme01").join(folder).join("docker");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(COMPOSE_FILE), "services: {}\n").unwrap();
    }

    #[tokio::test]
    async fn test_deploy_retries_then_lists_containers() {
        let tmp = TempDir::new().unwrap();
        with_compose(&tmp, "gateway");
        let runner = FakeRunner::new();
        runner.on_seq(
            " up -d",
            vec![
                CommandOutput::failed(1, "Error response from daemon: port is already allocated"),
                CommandOutput::ok(""),
            ],
        );
        runner.on(
            "label=com.docker.compose.project=acme-gateway",
            CommandOutput::ok(r#"{"ID":"1","Names":"acme-gateway","State":"running"}"#),
        );
        let vars = fs_vars(tmp.path())
            .with("customer_gateway_update", true)
            .with("retry_delay", 0);

        let result = execute_phase(&DeployContainersPhase, &vars, &fs_services(&runner, tmp.path())).await;
        assert!(result.success(), "{:?}", result.outcome);
        assert_eq!(runner.count_matching("compose -p acme-gateway"), 2);
        let steps = result.outcome.detail("steps").unwrap().as_array().unwrap();
        assert_eq!(steps[0]["attempts"], 2);
        assert_eq!(steps[0]["containers"], serde_json::json!(["acme-gateway"]));
    }

    #[tokio::test]
    async fn test_deploy_gives_up_after_budget() {
        let tmp = TempDir::new().unwrap();
        with_compose(&tmp, "portal");
        let runner = FakeRunner::new();
        runner.on(" up -d", CommandOutput::failed(1, "no space left on device"));
        let vars = fs_vars(tmp.path())
            .with("customer_portal_update", true)
            .with("max_retries", 2)
            .with("retry_delay", 0);

        let result = execute_phase(&DeployContainersPhase, &vars, &fs_services(&runner, tmp.path())).await;
        assert!(!result.success());
        assert_eq!(runner.count_matching(" up -d"), 2);
    }

    #[tokio::test]
    async fn test_registry_style_retry_settings() {
        let tmp = TempDir::new().unwrap();
        with_compose(&tmp, "gateway");
        let runner = FakeRunner::new();
        runner.on(" up -d", CommandOutput::failed(1, "network not found"));
        let vars = fs_vars(tmp.path())
            .with("customer_gateway_update", true)
            .with("max_retries", normalize_value("1"))
            .with("retry_delay", normalize_value("0"));

        let result = execute_phase(&DeployContainersPhase, &vars, &fs_services(&runner, tmp.path())).await;
        assert!(!result.success());
        assert_eq!(runner.count_matching("compose -p acme-gateway"), 1);
    }
}
