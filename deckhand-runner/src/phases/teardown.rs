//! Phase 01: tear a customer down
//!
//! The only phase gated on `customer_state == down`. Stops and removes every
//! container matching the customer's name filter and drops its backup jobs.

use async_trait::async_trait;
use deckhand_core::domain::cron::job_id;
use deckhand_core::{Outcome, Steps, Vars};
use tracing::{debug, info, warn};

use crate::manager::ContainerFilter;
use crate::phases::{backup_job_labels, cron_user};
use crate::services::Services;
use crate::task::{Phase, StateGate};

pub struct TeardownPhase;

impl TeardownPhase {
    async fn stop_and_remove(&self, filter: &str, services: &Services) -> Outcome {
        let containers = match services
            .docker
            .list_containers(&ContainerFilter::Name(filter.to_string()))
            .await
        {
            Ok(containers) => containers,
            Err(e) => return Outcome::failed(e),
        };

        if containers.is_empty() {
            info!("No containers found for {}", filter);
            return Outcome::unchanged("No containers to stop/remove")
                .with("stopped", 0)
                .with("removed", 0);
        }

        let mut stopped = 0;
        for container in containers.iter().filter(|c| c.is_running()) {
            match services.docker.stop_container(&container.name).await {
                Ok(true) => {
                    stopped += 1;
                    debug!("Stopped container: {}", container.name);
                }
                Ok(false) => {}
                Err(e) => warn!("Error stopping container {}: {}", container.name, e),
            }
        }

        let mut removed = 0;
        for container in &containers {
            match services.docker.remove_container(&container.name, true).await {
                Ok(true) => {
                    removed += 1;
                    debug!("Removed container: {}", container.name);
                }
                Ok(false) => {}
                Err(e) => warn!("Error removing container {}: {}", container.name, e),
            }
        }

        Outcome::done(
            stopped > 0 || removed > 0,
            format!("Stopped {} and removed {} containers", stopped, removed),
        )
        .with("total_containers", containers.len())
        .with("stopped", stopped)
        .with("removed", removed)
    }

    async fn remove_cron_jobs(&self, host: &str, user: &str, services: &Services) -> Outcome {
        let mut removed = Vec::new();

        for label in backup_job_labels(host) {
            match services.cron.remove_job(&job_id(&label), user).await {
                Ok(true) => {
                    info!("Removed cron job: {}", label);
                    removed.push(label);
                }
                Ok(false) => {}
                Err(e) => return Outcome::failed(e),
            }
        }

        Outcome::done(!removed.is_empty(), format!("Removed {} cron jobs", removed.len()))
            .with("removed_jobs", removed)
    }
}

#[async_trait]
impl Phase for TeardownPhase {
    fn name(&self) -> &'static str {
        "task_01_down_state"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["down", "cleanup"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "customer_containers", "inventory_hostname"]
    }

    fn gate(&self) -> StateGate {
        StateGate::Down
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let containers = vars.str_or("customer_containers", "");
        let host = vars.str_or("inventory_hostname", "");
        info!("Tearing down {} on {}", containers, host);

        let mut steps = Steps::new();
        steps.record("stop_remove_containers", self.stop_and_remove(&containers, services).await);
        let user = cron_user(vars, services);
        steps.record("remove_cron_jobs", self.remove_cron_jobs(&host, &user, services).await);

        steps
            .finish(format!("Down state completed for {}", containers))
            .with("customer_state", "down")
            .with("customer_containers", containers)
            .with("inventory_hostname", host)
    }
}
