//! Phase 06: sync service sources and render their compose files
//!
//! For every project whose update flag is set:
//! - sync the git working copy to the resolved ref
//! - ensure `docker/` (and `docker/init` for the gateway)
//! - render `compose-<folder>.yml.j2` into `docker/docker-compose.yml`
//!
//! Projects without the flag are recorded as skipped. Whether any checkout
//! moved is exported as `any_service_updated` for the phases that follow.

use async_trait::async_trait;
use deckhand_core::domain::project::{resolve_projects, ProjectDescriptor};
use deckhand_core::{Outcome, Steps, Vars};
use serde_json::Value as JsonValue;
use tracing::{error, info};

use crate::phases::{customer_root, ensure_dir, render_template_file};
use crate::services::Services;
use crate::task::Phase;

pub struct UpdateServicesPhase;

/// Updates one service
///
/// # Returns
/// The aggregated sub-step outcome with `git_changed` in its details
pub async fn update_service(project: &ProjectDescriptor, vars: &Vars, services: &Services) -> Outcome {
    let project_dir = customer_root(vars).join(&project.folder);
    let mut steps = Steps::new();

    let git = match services.git.sync(&project.repo, &project_dir, &project.version, project.force).await {
        Ok(sync) => {
            info!(
                "Git operation for {}: {:?} {} -> {}",
                project.name,
                sync.action,
                sync.before.as_deref().unwrap_or("-"),
                sync.after
            );
            let changed = sync.changed();
            Outcome::done(changed, format!("{} at {} ({})", project.name, sync.version, sync.after))
                .with("git", &sync)
        }
        Err(e) => {
            error!("Git operation failed for {}: {}", project.name, e);
            Outcome::failed(e)
        }
    };
    let git_changed = git.is_changed();
    if !steps.record("git_operation", git) {
        return steps.finish(format!("Failed to update service {}", project.name));
    }

    let docker_dir = project_dir.join("docker");
    steps.record("ensure_docker_directory", ensure_dir(services, &docker_dir, 0o755));
    if project.name == "gateway" {
        steps.record(
            "ensure_gateway_init_directory",
            ensure_dir(services, &docker_dir.join("init"), 0o755),
        );
    }

    let context = vars
        .clone()
        .with("project_name", project.name.clone())
        .with("project_folder", project.folder.clone())
        .with("project_version", project.version.clone());
    let template = services.config.templates_dir().join(project.compose_template());
    steps.record(
        "deploy_compose_template",
        render_template_file(services, &template, &docker_dir.join("docker-compose.yml"), &context, 0o644, true),
    );

    steps
        .finish(format!("Updated service {}", project.name))
        .with("project", &project.name)
        .with("git_changed", git_changed)
}

#[async_trait]
impl Phase for UpdateServicesPhase {
    fn name(&self) -> &'static str {
        "task_06_update_services"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["services", "update", "git"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "project_path", "inventory_hostname", "customer_containers"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let projects = resolve_projects(vars);
        if !projects.iter().any(|p| p.update) {
            info!("No services to update (update flags are false)");
            return Outcome::skipped("No services to update").with("any_service_updated", false);
        }

        let mut steps = Steps::new();
        let mut updated = Vec::new();
        for project in &projects {
            if !project.update {
                steps.record(
                    project.name.clone(),
                    Outcome::skipped(format!("Update flag is false for {}", project.name)),
                );
                continue;
            }

            let outcome = update_service(project, vars, services).await;
            if outcome.detail("git_changed") == Some(&JsonValue::Bool(true)) {
                info!("Service {} updated (git changed)", project.name);
                updated.push(project.name.clone());
            }
            steps.record(project.name.clone(), outcome);
        }

        let flagged = projects.iter().filter(|p| p.update).count();
        steps
            .finish(format!("Updated {} out of {} services", updated.len(), flagged))
            .with("any_service_updated", !updated.is_empty())
            .with("updated_services", &updated)
    }

    fn exports(&self, outcome: &Outcome) -> Vars {
        let updated = outcome.detail("any_service_updated") == Some(&JsonValue::Bool(true));
        let mut facts = Vars::new().with("any_service_updated", updated);
        if let Some(list) = outcome.detail("updated_services") {
            facts.insert("updated_services", list.clone());
        }
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests_support::{fs_services, fs_vars, write_template};
    use crate::process::CommandOutput;
    use crate::task::execute_phase;
    use crate::testing::FakeRunner;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_no_flags_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let result = execute_phase(&UpdateServicesPhase, &fs_vars(tmp.path()), &fs_services(&runner, tmp.path())).await;
        assert!(result.outcome.is_skipped());
        assert_eq!(result.outcome.message(), Some("No services to update"));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_only_gateway_flagged() {
        let tmp = TempDir::new().unwrap();
        write_template(
            tmp.path(),
            "compose-gateway.yml.j2",
            "services:\n  app:\n    container_name: {{ customer_containers }}-gateway\n",
        );
        let runner = FakeRunner::new();
        let services = fs_services(&runner, tmp.path());

        // Existing checkout whose HEAD moves on checkout
        let checkout = tmp.path().join("projects/acme01/gateway/.git");
        std::fs::create_dir_all(&checkout).unwrap();
        runner.on_seq(
            "rev-parse --short=7 HEAD",
            vec![CommandOutput::ok("1111111"), CommandOutput::ok("2222222")],
        );

        let vars = fs_vars(tmp.path()).with("customer_gateway_update", true);
        let phase = UpdateServicesPhase;
        let result = execute_phase(&phase, &vars, &services).await;

        assert!(result.success(), "{:?}", result.outcome);
        assert!(result.outcome.is_changed());
        let steps = result.outcome.detail("steps").unwrap().as_array().unwrap();
        assert_eq!(steps.len(), 5);
        for step in &steps[1..] {
            assert_eq!(step["skipped"], true);
        }

        let compose = std::fs::read_to_string(
            tmp.path().join("projects/acme01/gateway/docker/docker-compose.yml"),
        )
        .unwrap();
        assert!(compose.contains("container_name: acme-gateway"));
        assert!(tmp.path().join("projects/acme01/gateway/docker/init").is_dir());

        let facts = phase.exports(&result.outcome);
        assert!(facts.get_bool("any_service_updated"));
    }

    #[tokio::test]
    async fn test_git_failure_fails_phase() {
        let tmp = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.on("clone", CommandOutput::failed(128, "Permission denied (publickey)"));
        let vars = fs_vars(tmp.path()).with("customer_portal_update", "yes");

        let result = execute_phase(&UpdateServicesPhase, &vars, &fs_services(&runner, tmp.path())).await;
        assert!(!result.success());
        assert!(result.outcome.error().unwrap().to_string().contains("publickey"));
    }
}
