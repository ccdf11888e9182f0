//! Task domain types

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use super::outcome::Outcome;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Finalized record of one phase execution
///
/// Produced exactly once per run of a phase and never mutated afterwards.
/// Serializes as one flat object: the identity fields followed by the
/// outcome envelope and its details.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub outcome: Outcome,
}

const IDENTITY_KEYS: &[&str] = &[
    "task_id",
    "task_name",
    "status",
    "start_time",
    "end_time",
    "duration_seconds",
];

impl Serialize for TaskResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("task_id", &self.task_id)?;
        map.serialize_entry("task_name", &self.task_name)?;
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry("start_time", &self.start_time)?;
        map.serialize_entry("end_time", &self.end_time)?;
        map.serialize_entry("duration_seconds", &self.duration_seconds)?;
        self.outcome.serialize_entries(&mut map, IDENTITY_KEYS)?;
        map.end()
    }
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_result_json_shape() {
        let result = TaskResult {
            task_id: "1a2b3c4d".to_string(),
            task_name: "task_02_create_dirs".to_string(),
            status: TaskStatus::Completed,
            start_time: Some(Utc::now()),
            end_time: Some(Utc::now()),
            duration_seconds: Some(0.5),
            outcome: Outcome::changed("Directories created").with("directories_created", 3),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["success"], true);
        assert_eq!(json["changed"], true);
        assert_eq!(json["directories_created"], 3);
        assert_eq!(json["task_name"], "task_02_create_dirs");
    }

    #[test]
    fn test_details_cannot_shadow_identity_fields() {
        let result = TaskResult {
            task_id: "1a2b3c4d".to_string(),
            task_name: "task_12_deploy_containers".to_string(),
            status: TaskStatus::Completed,
            start_time: None,
            end_time: None,
            duration_seconds: None,
            outcome: Outcome::changed("Deployed")
                .with("task_name", "bogus")
                .with("status", "running")
                .with("containers_count", 2),
        };

        let text = serde_json::to_string(&result).unwrap();
        assert_eq!(text.matches("\"task_name\"").count(), 1);
        assert_eq!(text.matches("\"status\"").count(), 1);

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["task_name"], "task_12_deploy_containers");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["containers_count"], 2);
    }
}
