//! Phase 13: schema migrations inside running containers
//!
//! Runs only when phase 06 reported a moved checkout. Every flagged service
//! with a migration plan gets its commands executed in `<containers>-<svc>`.

use async_trait::async_trait;
use deckhand_core::domain::project::resolve_projects;
use deckhand_core::{DeployError, Outcome, Steps, Vars};
use std::time::Duration;
use tracing::{info, warn};

use crate::manager::ContainerFilter;
use crate::services::Services;
use crate::task::Phase;

const COMPOSER_INSTALL: &str = "composer install --no-dev --optimize-autoloader --no-interaction";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const CACHE_TIMEOUT: Duration = Duration::from_secs(60);

const LARAVEL_CACHE: [&str; 4] = [
    "php artisan config:clear",
    "php artisan config:cache",
    "php artisan route:cache",
    "php artisan view:cache",
];

/// One command of a migration plan
struct MigrationStep {
    name: &'static str,
    command: &'static str,
    timeout: Duration,
    /// A failure is logged and the plan continues
    optional: bool,
}

impl MigrationStep {
    const fn required(name: &'static str, command: &'static str) -> Self {
        Self {
            name,
            command,
            timeout: COMMAND_TIMEOUT,
            optional: false,
        }
    }

    const fn cache(command: &'static str) -> Self {
        Self {
            name: "cache",
            command,
            timeout: CACHE_TIMEOUT,
            optional: true,
        }
    }
}

/// Commands for a service, None when it has no migrations
fn plan(service: &str) -> Option<Vec<MigrationStep>> {
    match service {
        "portal" => Some(vec![
            MigrationStep::required("composer_install", COMPOSER_INSTALL),
            MigrationStep::required(
                "doctrine_migrate",
                "php bin/console doctrine:migrations:migrate --no-interaction --env=prod",
            ),
        ]),
        "gateway" => Some(vec![MigrationStep::required(
            "codeigniter_migrate",
            "php index.php migrate index false",
        )]),
        "lms" | "file" => {
            let mut steps = vec![MigrationStep::required("composer_install", COMPOSER_INSTALL)];
            steps.extend(LARAVEL_CACHE.into_iter().map(MigrationStep::cache));
            steps.push(MigrationStep::required("artisan_migrate", "php artisan migrate --force"));
            Some(steps)
        }
        _ => None,
    }
}

pub struct MigrationsPhase;

impl MigrationsPhase {
    async fn migrate(service: &str, container: &str, services: &Services) -> Outcome {
        let Some(plan) = plan(service) else {
            return Outcome::skipped(format!("No migrations for {}", service));
        };

        let found = match services
            .docker
            .list_containers(&ContainerFilter::Name(container.to_string()))
            .await
        {
            Ok(list) => list.into_iter().find(|c| c.name == container),
            Err(e) => return Outcome::failed(e),
        };
        match found {
            None => {
                return Outcome::failed(DeployError::NotFound(format!("container {}", container)));
            }
            Some(info) if !info.is_running() => {
                warn!("Container {} is {}, migrations may fail", container, info.state);
            }
            Some(_) => {}
        }

        let mut steps = Steps::new();
        for step in &plan {
            let name = if step.optional {
                format!("{}_{}", step.name, step.command.rsplit(' ').next().unwrap_or(step.command))
            } else {
                step.name.to_string()
            };

            match services.docker.exec_in_container(container, step.command, step.timeout).await {
                Ok(_) => {
                    steps.record(name, Outcome::changed(format!("{} in {}", step.command, container)));
                }
                Err(e) if step.optional => {
                    warn!("{} failed in {}: {}", step.command, container, e);
                    steps.record(name, Outcome::skipped(format!("{} failed: {}", step.command, e)));
                }
                Err(e) => {
                    steps.record(name, Outcome::failed(e));
                    break;
                }
            }
        }

        steps
            .finish(format!("Migrations completed for {}", service))
            .with("container", container)
    }
}

#[async_trait]
impl Phase for MigrationsPhase {
    fn name(&self) -> &'static str {
        "task_13_run_migrations"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["migrations", "deploy"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "customer_containers"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        if !vars.get_bool("any_service_updated") {
            info!("No services were updated, skipping migrations");
            return Outcome::skipped("No services were updated");
        }

        let containers = vars.str_or("customer_containers", "");
        let mut steps = Steps::new();
        for project in resolve_projects(vars) {
            if !project.update {
                steps.record(&project.name, Outcome::skipped(format!("Update flag is false for {}", project.name)));
                continue;
            }
            let container = format!("{}-{}", containers, project.name);
            info!("Running migrations for {} in {}", project.name, container);
            steps.record(&project.name, Self::migrate(&project.name, &container, services).await);
        }

        steps
            .finish("Migrations completed")
            .with("any_service_updated", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests_support::{services, up_vars};
    use crate::process::CommandOutput;
    use crate::task::execute_phase;
    use crate::testing::FakeRunner;

    fn running(name: &str) -> CommandOutput {
        CommandOutput::ok(format!(r#"{{"ID":"1","Names":"{}","State":"running"}}"#, name))
    }

    #[tokio::test]
    async fn test_skipped_without_updates() {
        let runner = FakeRunner::new();
        let vars = up_vars().with("customer_gateway_update", true);
        let result = execute_phase(&MigrationsPhase, &vars, &services(&runner)).await;
        assert!(result.outcome.is_skipped());
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_gateway_migration_only() {
        let runner = FakeRunner::new();
        runner.on("name=acme-gateway", running("acme-gateway"));
        let vars = up_vars()
            .with("customer_gateway_update", true)
            .with("any_service_updated", true);

        let result = execute_phase(&MigrationsPhase, &vars, &services(&runner)).await;
        assert!(result.success(), "{:?}", result.outcome);
        assert!(result.outcome.is_changed());
        assert_eq!(runner.count_matching("docker exec acme-gateway sh -c php index.php migrate index false"), 1);
        assert_eq!(runner.count_matching("docker exec"), 1);
    }

    #[tokio::test]
    async fn test_cache_failure_does_not_stop_laravel_plan() {
        let runner = FakeRunner::new();
        runner.on("name=acme-lms", running("acme-lms"));
        runner.on("route:cache", CommandOutput::failed(1, "Unable to prepare route"));
        let vars = up_vars()
            .with("customer_lms_update", true)
            .with("any_service_updated", true);

        let result = execute_phase(&MigrationsPhase, &vars, &services(&runner)).await;
        assert!(result.success(), "{:?}", result.outcome);
        assert_eq!(runner.count_matching("php artisan migrate --force"), 1);
    }

    #[tokio::test]
    async fn test_missing_container_fails() {
        let runner = FakeRunner::new();
        let vars = up_vars()
            .with("customer_portal_update", true)
            .with("any_service_updated", true);

        let result = execute_phase(&MigrationsPhase, &vars, &services(&runner)).await;
        assert!(!result.success());
        assert_eq!(result.outcome.error().unwrap().kind(), "not_found");
    }
}
