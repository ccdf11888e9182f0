//! Phase 00: docker network bootstrap

use async_trait::async_trait;
use deckhand_core::{Outcome, Vars};
use tracing::{info, warn};

use crate::services::Services;
use crate::task::Phase;

const DEFAULT_NETWORK: &str = "traefik_reverse_proxy";
const VALID_DRIVERS: [&str; 6] = ["bridge", "overlay", "macvlan", "ipvlan", "host", "none"];

/// Ensures the shared reverse-proxy network is present (or absent)
pub struct NetworkPhase;

struct NetworkParams {
    name: String,
    driver: String,
    present: bool,
    attachable: bool,
}

impl NetworkParams {
    fn from_vars(vars: &Vars) -> Self {
        Self {
            name: vars.str_or("network_name", DEFAULT_NETWORK),
            driver: vars.str_or("network_driver", "bridge"),
            present: vars.str_or("network_state", "present") == "present",
            attachable: vars.bool_or("network_attachable", true),
        }
    }
}

#[async_trait]
impl Phase for NetworkPhase {
    fn name(&self) -> &'static str {
        "task_00_network"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["network", "always"]
    }

    fn validate(&self, vars: &Vars) -> Vec<String> {
        let mut errors = vars.missing(self.required_params());

        let name = vars.str_or("network_name", DEFAULT_NETWORK);
        if name.len() >= 128 {
            errors.push("Network name must be less than 128 characters".to_string());
        } else if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            warn!("Network name '{}' contains special characters", name);
        }

        let driver = vars.str_or("network_driver", "bridge");
        if !VALID_DRIVERS.contains(&driver.as_str()) {
            errors.push(format!(
                "Driver '{}' is not valid. Valid drivers: {}",
                driver,
                VALID_DRIVERS.join(", ")
            ));
        }

        let state = vars.str_or("network_state", "present");
        if state != "present" && state != "absent" {
            errors.push(format!("State '{}' is not valid. Must be 'present' or 'absent'", state));
        }
        errors
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let params = NetworkParams::from_vars(vars);

        if params.present {
            match services
                .docker
                .create_network(&params.name, &params.driver, params.attachable)
                .await
            {
                Ok(true) => Outcome::changed(format!("Network '{}' created successfully", params.name)),
                Ok(false) => Outcome::unchanged(format!("Network '{}' already exists", params.name)),
                Err(e) => Outcome::failed(e),
            }
            .with("network_name", &params.name)
            .with("driver", &params.driver)
        } else {
            match services.docker.remove_network(&params.name).await {
                Ok(true) => {
                    info!("Network '{}' removed", params.name);
                    Outcome::changed(format!("Network '{}' removed successfully", params.name))
                }
                Ok(false) => Outcome::unchanged(format!("Network '{}' does not exist", params.name)),
                Err(e) => Outcome::failed(e),
            }
            .with("network_name", &params.name)
        }
    }
}
