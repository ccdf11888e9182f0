//! Pipeline domain types

use serde::Serialize;

use super::task::TaskResult;
use crate::vars::Vars;

/// Parameters of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    /// Only phases carrying one of these tags run; empty or `always` means all
    pub tags: Vec<String>,
    /// First phase to run (inclusive)
    pub start_from: Option<String>,
    /// Last phase to run (inclusive)
    pub stop_at: Option<String>,
    /// Continue after a failed phase
    pub ignore_failures: bool,
    /// Variables layered over the customer's own
    pub vars: Vars,
}

/// Slices a phase sequence to the `[start_from, stop_at]` window
///
/// Unknown phase names leave the sequence unchanged and produce a warning.
///
/// # Returns
/// (sliced sequence, warnings)
pub fn slice_sequence(
    sequence: &[String],
    start_from: Option<&str>,
    stop_at: Option<&str>,
) -> (Vec<String>, Vec<String>) {
    let mut sliced: Vec<String> = sequence.to_vec();
    let mut warnings = Vec::new();

    if let Some(start) = start_from {
        match sliced.iter().position(|name| name == start) {
            Some(idx) => sliced = sliced.split_off(idx),
            None => warnings.push(format!("Task {} not found in sequence", start)),
        }
    }

    if let Some(stop) = stop_at {
        match sliced.iter().position(|name| name == stop) {
            Some(idx) => sliced.truncate(idx + 1),
            None => warnings.push(format!("Task {} not found in sequence", stop)),
        }
    }

    (sliced, warnings)
}

/// Aggregate result of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    /// Percentage of executed tasks that succeeded
    pub success_rate: f64,
    /// Phases selected for this run, in order
    pub execution_order: Vec<String>,
    /// Results of the phases that actually ran
    pub results: Vec<TaskResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PipelineSummary {
    /// Builds the summary from executed phases
    pub fn from_results(execution_order: Vec<String>, results: Vec<TaskResult>) -> Self {
        let total_tasks = results.len();
        let successful_tasks = results.iter().filter(|r| r.success()).count();
        let success_rate = if total_tasks == 0 {
            0.0
        } else {
            (successful_tasks as f64 / total_tasks as f64) * 100.0
        };

        Self {
            success: successful_tasks == total_tasks,
            error: None,
            customer: None,
            host: None,
            total_tasks,
            successful_tasks,
            failed_tasks: total_tasks - successful_tasks,
            success_rate,
            execution_order,
            results,
            warnings: Vec::new(),
        }
    }

    /// Summary of a run that could not start
    pub fn aborted(error: impl Into<String>) -> Self {
        let mut summary = Self::from_results(Vec::new(), Vec::new());
        summary.success = false;
        summary.error = Some(error.into());
        summary
    }

    /// Names of the phases that failed
    pub fn failed_task_names(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.success())
            .map(|r| r.task_name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq() -> Vec<String> {
        ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_slice_window() {
        let (sliced, warnings) = slice_sequence(&seq(), Some("b"), Some("c"));
        assert_eq!(sliced, vec!["b", "c"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_slice_unknown_names_warn() {
        let (sliced, warnings) = slice_sequence(&seq(), Some("x"), Some("y"));
        assert_eq!(sliced, seq());
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_slice_stop_before_start_keeps_tail() {
        let (sliced, _) = slice_sequence(&seq(), Some("c"), Some("a"));
        assert_eq!(sliced, vec!["c", "d"]);
    }

    #[test]
    fn test_aborted_summary() {
        let summary = PipelineSummary::aborted("Customer acme not found");
        assert!(!summary.success);
        assert_eq!(summary.total_tasks, 0);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["error"], "Customer acme not found");
    }
}
