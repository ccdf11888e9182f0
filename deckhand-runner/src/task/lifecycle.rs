//! Task lifecycle bookkeeping
//!
//! A [`TaskRun`] tracks one execution of a phase from start to its single
//! terminal state and produces the immutable [`TaskResult`].

use chrono::{DateTime, Utc};
use deckhand_core::domain::task::{TaskResult, TaskStatus};
use deckhand_core::{DeployError, Details, Outcome};
use tracing::{debug, error, info};
use uuid::Uuid;

/// One in-flight phase execution
#[derive(Debug)]
pub struct TaskRun {
    id: String,
    name: String,
    status: TaskStatus,
    start_time: Option<DateTime<Utc>>,
}

impl TaskRun {
    /// Creates a pending run with a short random id
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        debug!("Initialized task: {} (ID: {})", name, id);
        Self {
            id,
            name,
            status: TaskStatus::Pending,
            start_time: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Records the start time
    pub fn start(&mut self) {
        self.start_time = Some(Utc::now());
        self.status = TaskStatus::Running;
        info!("Starting task: {} (ID: {})", self.name, self.id);
    }

    /// Finalizes a successful (or skipped) run
    ///
    /// A failed outcome is routed to [`TaskRun::fail`] so the status always
    /// matches the outcome.
    pub fn complete(self, outcome: Outcome) -> TaskResult {
        if let Outcome::Failed { error, details } = outcome {
            return self.fail(error, details);
        }

        let end_time = Utc::now();
        let duration = self.duration_until(end_time);
        info!(
            "Task {} completed in {:.2} seconds (ID: {})",
            self.name,
            duration.unwrap_or(0.0),
            self.id
        );

        TaskResult {
            task_id: self.id,
            task_name: self.name,
            status: TaskStatus::Completed,
            start_time: self.start_time,
            end_time: Some(end_time),
            duration_seconds: duration,
            outcome,
        }
    }

    /// Finalizes a failed run
    ///
    /// Duration is still computed when `start` was never called.
    pub fn fail(self, error: DeployError, details: Details) -> TaskResult {
        let end_time = Utc::now();
        let duration = self.duration_until(end_time);
        error!(
            "Task {} failed after {:.2} seconds (ID: {}): {}",
            self.name,
            duration.unwrap_or(0.0),
            self.id,
            error
        );

        TaskResult {
            task_id: self.id,
            task_name: self.name,
            status: TaskStatus::Failed,
            start_time: self.start_time,
            end_time: Some(end_time),
            duration_seconds: duration,
            outcome: Outcome::failed(error).with_details(details),
        }
    }

    fn duration_until(&self, end_time: DateTime<Utc>) -> Option<f64> {
        let start = self.start_time?;
        Some((end_time - start).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_stamps_result() {
        let mut run = TaskRun::new("task_02_create_dirs");
        assert_eq!(run.id().len(), 8);
        assert_eq!(run.status(), TaskStatus::Pending);
        run.start();
        assert_eq!(run.status(), TaskStatus::Running);

        let result = run.complete(Outcome::changed("Directories created"));
        assert_eq!(result.status, TaskStatus::Completed);
        assert!(result.start_time.is_some());
        assert!(result.duration_seconds.unwrap() >= 0.0);
        assert!(result.success());
    }

    #[test]
    fn test_fail_without_start() {
        let run = TaskRun::new("task_12_deploy_containers");
        let result = run.fail(DeployError::NotFound("compose file".to_string()), Details::new());
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.start_time.is_none());
        assert!(result.end_time.is_some());
        assert!(result.duration_seconds.is_none());
        assert!(!result.success());
    }

    #[test]
    fn test_complete_with_failed_outcome_is_failed() {
        let mut run = TaskRun::new("task_11_build_customer_images");
        run.start();
        let result = run.complete(Outcome::failed(DeployError::Io("disk full".to_string())));
        assert_eq!(result.status, TaskStatus::Failed);
    }
}
