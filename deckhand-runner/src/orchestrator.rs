//! Pipeline orchestrator
//!
//! Runs the phase catalogue for one customer, strictly in order:
//! - the sequence is filtered by tags and sliced by `start_from`/`stop_at`
//! - facts exported by a phase are merged into the variables of later phases
//! - the run stops at the first failed phase unless failures are ignored

use deckhand_core::domain::customer::CustomerRecord;
use deckhand_core::domain::pipeline::{PipelineRequest, PipelineSummary, slice_sequence};
use deckhand_core::domain::task::TaskResult;
use deckhand_core::{DeployError, Details, Vars};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::phases::all_phases;
use crate::registry::CustomerRegistry;
use crate::retry::RetryPolicy;
use crate::services::Services;
use crate::task::{Phase, TaskRun, execute_phase};

/// Tag that selects every phase
pub const ALWAYS_TAG: &str = "always";

/// Name and tags of a registered phase
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub name: &'static str,
    pub tags: Vec<&'static str>,
}

pub struct Orchestrator {
    services: Services,
    phases: Vec<Arc<dyn Phase>>,
}

impl Orchestrator {
    /// Orchestrator over the full phase catalogue
    pub fn new(services: Services) -> Self {
        Self::with_phases(services, all_phases())
    }

    /// Orchestrator over an explicit phase list, kept in the given order
    pub fn with_phases(services: Services, phases: Vec<Arc<dyn Phase>>) -> Self {
        Self { services, phases }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn list_tasks(&self) -> Vec<TaskInfo> {
        self.phases
            .iter()
            .map(|phase| TaskInfo {
                name: phase.name(),
                tags: phase.tags().to_vec(),
            })
            .collect()
    }

    /// Phase names selected by `tags`
    ///
    /// No tags, or the `always` tag, selects every phase.
    pub fn sequence(&self, tags: &[String]) -> Vec<String> {
        let select_all = tags.is_empty() || tags.iter().any(|t| t == ALWAYS_TAG);
        self.phases
            .iter()
            .filter(|phase| select_all || phase.tags().iter().any(|tag| tags.iter().any(|t| t == tag)))
            .map(|phase| phase.name().to_string())
            .collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Phase>> {
        self.phases.iter().find(|phase| phase.name() == name)
    }

    /// Runs the selected phases against `vars`
    ///
    /// # Arguments
    /// * `vars` - Customer variables; `request.vars` is layered on top
    /// * `request` - Tag selection, slicing and failure policy
    ///
    /// # Returns
    /// The summary of every phase that ran; later phases after a failure are absent
    pub async fn run(&self, mut vars: Vars, request: &PipelineRequest) -> PipelineSummary {
        vars.extend(&request.vars);

        let selected = self.sequence(&request.tags);
        let (execution_order, warnings) = slice_sequence(
            &selected,
            request.start_from.as_deref(),
            request.stop_at.as_deref(),
        );
        for warning in &warnings {
            warn!("{}", warning);
        }

        info!(
            "Starting pipeline for host {} ({} phases)",
            vars.str_or("inventory_hostname", "unknown"),
            execution_order.len()
        );

        let mut results = Vec::with_capacity(execution_order.len());
        for name in &execution_order {
            let Some(phase) = self.find(name) else {
                continue;
            };

            let result = execute_phase(phase.as_ref(), &vars, &self.services).await;
            if result.success() {
                vars.extend(&phase.exports(&result.outcome));
            }
            let failed = !result.success();
            results.push(result);

            if failed && !request.ignore_failures {
                error!("Pipeline stopped due to failure in task: {}", name);
                break;
            }
        }

        let mut summary = PipelineSummary::from_results(execution_order, results);
        summary.warnings = warnings;
        summary.host = vars.host();
        summary.customer = vars.get_str("customer_name");
        info!(
            "Pipeline completed: {}/{} tasks successful",
            summary.successful_tasks, summary.total_tasks
        );
        summary
    }

    /// Runs the pipeline for a customer from the registry
    pub async fn run_for_customer(
        &self,
        registry: &CustomerRegistry,
        name: &str,
        request: &PipelineRequest,
    ) -> PipelineSummary {
        match registry.get(name) {
            Some(record) => self.run_for_record(record, request).await,
            None => {
                error!("Customer {} not found", name);
                let mut summary = PipelineSummary::aborted(format!("Customer {} not found", name));
                summary.customer = Some(name.to_string());
                summary
            }
        }
    }

    /// Runs the pipeline for the customer deployed on `host`
    pub async fn run_for_host(
        &self,
        registry: &CustomerRegistry,
        host: &str,
        request: &PipelineRequest,
    ) -> PipelineSummary {
        match registry.get_by_host(host) {
            Some(record) => self.run_for_record(record, request).await,
            None => {
                error!("No customer found for host {}", host);
                let mut summary = PipelineSummary::aborted(format!("No customer found for host {}", host));
                summary.host = Some(host.to_string());
                summary
            }
        }
    }

    async fn run_for_record(&self, record: &CustomerRecord, request: &PipelineRequest) -> PipelineSummary {
        info!("Executing pipeline for customer: {}", record.customer_name);
        let vars = self.services.config.customer_vars(record);
        self.run(vars, request).await
    }

    /// Runs one phase on its own
    ///
    /// An unknown name yields a failed result rather than an error.
    pub async fn run_phase(&self, name: &str, vars: &Vars) -> TaskResult {
        match self.find(name) {
            Some(phase) => execute_phase(phase.as_ref(), vars, &self.services).await,
            None => {
                let mut run = TaskRun::new(name);
                run.start();
                run.fail(DeployError::NotFound(format!("task {}", name)), Details::new())
            }
        }
    }

    /// Runs one phase, re-running it while it fails
    ///
    /// The last result carries `attempts` and `max_retries`.
    pub async fn execute_with_retry(&self, name: &str, vars: &Vars, policy: RetryPolicy) -> TaskResult {
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!("Attempt {}/{} for task {}", attempt, policy.max_attempts, name);
            let mut result = self.run_phase(name, vars).await;

            let retryable = match result.outcome.error() {
                None | Some(DeployError::Validation { .. }) => false,
                Some(DeployError::NotFound(_)) if self.find(name).is_none() => false,
                Some(err) => !policy.only_timeouts || err.is_timeout(),
            };

            if !retryable || attempt >= policy.max_attempts {
                if !result.success() && retryable {
                    error!("Task {} failed after {} attempts", name, attempt);
                }
                result.outcome = result
                    .outcome
                    .with("attempts", attempt)
                    .with("max_retries", policy.max_attempts);
                return result;
            }

            warn!(
                "Task {} failed (attempt {}/{}), retrying in {:?}",
                name, attempt, policy.max_attempts, policy.delay
            );
            tokio::time::sleep(policy.delay).await;
        }
    }
}
