//! Phases 10 and 11: base image pulls and customer image builds

use async_trait::async_trait;
use deckhand_core::domain::project::resolve_projects;
use deckhand_core::{DeployError, Outcome, Steps, Vars};
use std::time::Duration;
use tracing::{info, warn};

use crate::phases::customer_root;
use crate::services::Services;
use crate::task::Phase;

/// Base images every customer stack builds on
pub const BASE_IMAGES: [&str; 6] = [
    "mariadb:10.11",
    "mariadb:10.6.20-focal",
    "nginx:alpine",
    "node:22",
    "php:8.1-apache-bookworm",
    "php:8.2-apache-bookworm",
];

const PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Pre-pulls [`BASE_IMAGES`]
pub struct PrePullImagesPhase;

#[async_trait]
impl Phase for PrePullImagesPhase {
    fn name(&self) -> &'static str {
        "task_10_pre_pull_images"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["images", "docker"]
    }

    async fn run(&self, _vars: &Vars, services: &Services) -> Outcome {
        let mut steps = Steps::new();
        let mut pulled = 0;

        for image in BASE_IMAGES {
            let outcome = match services.docker.pull_image(image, PULL_TIMEOUT).await {
                Ok(()) => {
                    pulled += 1;
                    Outcome::changed(format!("Pulled {}", image))
                }
                Err(DeployError::NotFound(what)) => {
                    warn!("Image {} not found, skipping", image);
                    Outcome::skipped(format!("Image not found: {}", what))
                }
                Err(e) => Outcome::failed(e),
            };
            steps.record(image, outcome);
        }

        steps
            .finish(format!("Pre-pulled {} images", pulled))
            .with("images", BASE_IMAGES)
    }
}

/// Builds compose images for flagged projects
pub struct BuildImagesPhase;

#[async_trait]
impl Phase for BuildImagesPhase {
    fn name(&self) -> &'static str {
        "task_11_build_customer_images"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["build", "docker", "images"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "project_path", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let root = customer_root(vars);
        let no_cache = vars.get_bool("build_no_cache");
        let mut steps = Steps::new();
        let mut built = 0;

        for project in resolve_projects(vars) {
            if !project.update {
                steps.record(&project.name, Outcome::skipped(format!("Update flag is false for {}", project.name)));
                continue;
            }

            let compose_dir = root.join(&project.folder).join("docker");
            if !compose_dir.is_dir() {
                steps.record(
                    &project.name,
                    Outcome::failed(DeployError::NotFound(format!(
                        "compose directory {}",
                        compose_dir.display()
                    ))),
                );
                continue;
            }

            info!("Building image for {} in {}", project.name, compose_dir.display());
            let outcome = match services.docker.compose_build(&compose_dir, true, no_cache).await {
                Ok(output) => {
                    let text = format!("{}{}", output.stdout, output.stderr);
                    let changed = text.contains("Building") || text.contains("Built");
                    if changed {
                        built += 1;
                    }
                    Outcome::done(changed, format!("Built image for {}", project.name))
                }
                Err(e) => Outcome::failed(e),
            };
            steps.record(&project.name, outcome);
        }

        steps.finish(format!("Built {} images", built)).with("built_count", built)
    }
}
