//! Pipeline command handlers

use anyhow::{Result, bail};
use deckhand_core::domain::pipeline::PipelineRequest;
use deckhand_runner::orchestrator::Orchestrator;
use deckhand_runner::services::Services;
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::output::{print_json, report_status};

/// Runs the pipeline for a customer selected by name or host
pub async fn handle_run(
    customer: Option<String>,
    host: Option<String>,
    request: PipelineRequest,
    config: &Config,
) -> Result<bool> {
    let registry = config.registry()?;
    let orchestrator = Orchestrator::new(Services::standard(config.deploy.clone()));

    let summary = match (customer, host) {
        (Some(name), _) => orchestrator.run_for_customer(&registry, &name, &request).await,
        (None, Some(host)) => orchestrator.run_for_host(&registry, &host, &request).await,
        (None, None) => bail!("either --customer or --host is required"),
    };
    orchestrator.services().ssh.close_all().await;

    info!(
        "{} of {} phases succeeded ({:.1}%)",
        summary.successful_tasks, summary.total_tasks, summary.success_rate
    );
    print_json(&summary)?;
    report_status(
        summary.success,
        &format!("pipeline {}", summary.customer.as_deref().unwrap_or("run")),
    );
    Ok(summary.success)
}

/// Lists every phase in execution order
pub fn list_tasks(config: &Config) -> Result<bool> {
    let orchestrator = Orchestrator::new(Services::standard(config.deploy.clone()));
    let tasks = orchestrator.list_tasks();
    print_json(&json!({
        "success": true,
        "count": tasks.len(),
        "tasks": tasks,
    }))?;
    Ok(true)
}
