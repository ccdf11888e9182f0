//! Standalone phase invocation
//!
//! Runs one phase with variables taken from the registry, the configuration
//! defaults and `--set` overrides, in that order.

use anyhow::{Context, Result};
use deckhand_core::Vars;
use deckhand_runner::orchestrator::Orchestrator;
use deckhand_runner::retry::RetryPolicy;
use deckhand_runner::services::Services;
use std::time::Duration;

use super::vars_from_pairs;
use crate::config::Config;
use crate::output::{print_json, report_status};

/// Runs one phase and prints its task result
///
/// # Arguments
/// * `task` - Phase name
/// * `customer` - Registry customer providing the base variables
/// * `set` - Variable overrides
/// * `retries` - Extra attempts while the phase fails
/// * `retry_delay` - Seconds between attempts
pub async fn handle_phase(
    task: &str,
    customer: Option<String>,
    set: Vec<(String, String)>,
    retries: u32,
    retry_delay: u64,
    config: &Config,
) -> Result<bool> {
    let mut vars = match customer {
        Some(name) => {
            let registry = config.registry()?;
            let record = registry
                .get(&name)
                .with_context(|| format!("Customer {} not found", name))?;
            config.deploy.customer_vars(record)
        }
        None => {
            let mut vars = Vars::new();
            config.deploy.apply_defaults(&mut vars);
            vars
        }
    };
    vars.extend(&vars_from_pairs(set));

    let orchestrator = Orchestrator::new(Services::standard(config.deploy.clone()));
    let result = if retries > 0 {
        let policy = RetryPolicy::new(retries + 1, Duration::from_secs(retry_delay));
        orchestrator.execute_with_retry(task, &vars, policy).await
    } else {
        orchestrator.run_phase(task, &vars).await
    };

    print_json(&result)?;
    report_status(result.success(), task);
    Ok(result.success())
}
