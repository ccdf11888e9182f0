//! Phase 03: resolve the project catalogue for a customer

use async_trait::async_trait;
use deckhand_core::domain::project::resolve_projects;
use deckhand_core::{Outcome, Vars};
use tracing::info;

use crate::services::Services;
use crate::task::Phase;

pub struct DefineProjectsPhase;

#[async_trait]
impl Phase for DefineProjectsPhase {
    fn name(&self) -> &'static str {
        "task_03_define_projects"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["projects", "setup"]
    }

    async fn run(&self, vars: &Vars, _services: &Services) -> Outcome {
        let projects = resolve_projects(vars);
        let flagged: Vec<&str> = projects
            .iter()
            .filter(|p| p.update)
            .map(|p| p.name.as_str())
            .collect();

        for project in &projects {
            info!(
                "Project {} -> {} (update: {})",
                project.name, project.version, project.update
            );
        }

        Outcome::unchanged(format!(
            "Defined {} projects, {} flagged for update",
            projects.len(),
            flagged.len()
        ))
        .with("projects_to_update", &flagged)
        .with("projects", &projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests_support::{services, up_vars};
    use crate::task::execute_phase;
    use crate::testing::FakeRunner;

    #[tokio::test]
    async fn test_projects_resolved_without_side_effects() {
        let runner = FakeRunner::new();
        let vars = up_vars()
            .with("customer_gateway_update", true)
            .with("customer_gateway_git_tags", "v3.2.0")
            .with("customer_lms_git_branches", "develop");

        let result = execute_phase(&DefineProjectsPhase, &vars, &services(&runner)).await;
        assert!(result.success());
        assert!(!result.outcome.is_changed());
        assert_eq!(runner.call_count(), 0);

        let projects = result.outcome.detail("projects").unwrap().as_array().unwrap();
        assert_eq!(projects.len(), 5);
        assert_eq!(projects[0]["version"], "v3.2.0");
        assert_eq!(projects[3]["version"], "develop");
        assert_eq!(projects[1]["version"], "main");
        assert_eq!(result.outcome.detail("projects_to_update").unwrap(), &serde_json::json!(["gateway"]));
    }
}
