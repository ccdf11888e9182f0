//! Configuration module
//!
//! Loads the deployment configuration once per invocation and applies the
//! command-line overrides on top of the environment.

use anyhow::{Context, Result};
use deckhand_runner::config::DeployConfig;
use deckhand_runner::registry::CustomerRegistry;
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub deploy: DeployConfig,
}

impl Config {
    /// Reads the environment, applies overrides and validates the result
    pub fn load(customers_file: Option<PathBuf>) -> Result<Self> {
        let mut deploy = DeployConfig::from_env().context("Failed to load configuration")?;
        if let Some(path) = customers_file {
            deploy.customers_file = path;
        }
        deploy.validate().context("Invalid configuration")?;
        Ok(Self { deploy })
    }

    /// Opens the customer registry
    pub fn registry(&self) -> Result<CustomerRegistry> {
        CustomerRegistry::load(self.deploy.customers_file.clone()).with_context(|| {
            format!(
                "Failed to load customer registry {}",
                self.deploy.customers_file.display()
            )
        })
    }
}
