//! Phase contract and execution
//!
//! Every pipeline phase implements [`Phase`]. [`execute_phase`] wraps a phase
//! in the lifecycle:
//! - required parameters are validated before anything else
//! - the customer-state gate turns the phase into a skipped no-op
//! - the phase body runs and its outcome is stamped into a [`TaskResult`]

pub mod lifecycle;

use async_trait::async_trait;
use deckhand_core::domain::task::TaskResult;
use deckhand_core::{DeployError, Details, Outcome, Vars};

use crate::services::Services;
pub use lifecycle::TaskRun;

/// When a phase is allowed to act
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateGate {
    /// Only when `customer_state` is `up`
    Up,
    /// Only when `customer_state` is `down`
    Down,
}

/// One step of the deployment pipeline
#[async_trait]
pub trait Phase: Send + Sync {
    /// Unique phase name, e.g. `task_02_create_dirs`
    fn name(&self) -> &'static str;

    /// Tags used by `--tags` selection
    fn tags(&self) -> &'static [&'static str];

    /// Variables that must be present and non-empty
    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state"]
    }

    fn gate(&self) -> StateGate {
        StateGate::Up
    }

    /// Checks inputs before any side effect
    ///
    /// # Returns
    /// Every problem found, empty when the inputs are usable
    fn validate(&self, vars: &Vars) -> Vec<String> {
        let mut errors = vars.missing(self.required_params());
        if let Some(state) = vars.get_str("customer_state") {
            if vars.customer_state().is_none() {
                errors.push(format!("customer_state must be 'up' or 'down', got '{}'", state));
            }
        }
        errors
    }

    /// Performs the phase
    async fn run(&self, vars: &Vars, services: &Services) -> Outcome;

    /// Facts made available to the phases that follow
    fn exports(&self, _outcome: &Outcome) -> Vars {
        Vars::new()
    }
}

/// Runs a phase through validation, gating and the task lifecycle
pub async fn execute_phase(phase: &dyn Phase, vars: &Vars, services: &Services) -> TaskResult {
    let mut run = TaskRun::new(phase.name());
    run.start();

    let errors = phase.validate(vars);
    if !errors.is_empty() {
        return run.fail(DeployError::validation(errors), Details::new());
    }

    let open = match phase.gate() {
        StateGate::Up => vars.is_up(),
        StateGate::Down => !vars.is_up(),
    };
    if !open {
        let state = vars.str_or("customer_state", "unset");
        return run.complete(
            Outcome::skipped(format!("Customer state is '{}'", state)).with("customer_state", state),
        );
    }

    let outcome = phase.run(vars, services).await;
    run.complete(outcome)
}
