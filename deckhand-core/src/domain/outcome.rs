//! Operation outcome
//!
//! The uniform result every phase and sub-step produces. The variants make the
//! result protocol invariants structural:
//! - only `Done` can report `changed`
//! - `Failed` always carries an error, so its JSON form always has a non-empty `error`
//! - `Skipped` marks a precondition that turned the operation into a no-op

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as JsonValue;

use crate::error::DeployError;

/// Free-form context attached to an outcome (paths, counts, ids)
pub type Details = serde_json::Map<String, JsonValue>;

/// Keys owned by the envelope; details never override them
const RESERVED_KEYS: &[&str] = &[
    "success",
    "changed",
    "skipped",
    "timeout",
    "error",
    "error_kind",
    "message",
];

/// Result of a single operation or phase
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Operation ran; `changed` tells whether an external side effect happened
    Done {
        changed: bool,
        message: Option<String>,
        details: Details,
    },
    /// A gate or missing input made the operation a no-op
    Skipped { message: String, details: Details },
    /// Operation failed
    Failed { error: DeployError, details: Details },
}

impl Outcome {
    /// Successful outcome with an explicit change flag
    pub fn done(changed: bool, message: impl Into<String>) -> Self {
        Self::Done {
            changed,
            message: Some(message.into()),
            details: Details::new(),
        }
    }

    /// Successful outcome that performed a side effect
    pub fn changed(message: impl Into<String>) -> Self {
        Self::done(true, message)
    }

    /// Successful outcome confirming existing state
    pub fn unchanged(message: impl Into<String>) -> Self {
        Self::done(false, message)
    }

    /// No-op outcome
    pub fn skipped(message: impl Into<String>) -> Self {
        Self::Skipped {
            message: message.into(),
            details: Details::new(),
        }
    }

    /// Failed outcome
    pub fn failed(error: DeployError) -> Self {
        Self::Failed {
            error,
            details: Details::new(),
        }
    }

    /// Attaches a detail field
    ///
    /// Values that cannot be represented as JSON are stored as null.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(JsonValue::Null);
        self.details_mut().insert(key.to_string(), value);
        self
    }

    /// Attaches every field of a details map
    pub fn with_details(mut self, extra: Details) -> Self {
        self.details_mut().extend(extra);
        self
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Done { changed: true, .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_timeout(&self) -> bool {
        self.error().is_some_and(DeployError::is_timeout)
    }

    pub fn error(&self) -> Option<&DeployError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Done { message, .. } => message.as_deref(),
            Self::Skipped { message, .. } => Some(message),
            Self::Failed { .. } => None,
        }
    }

    pub fn details(&self) -> &Details {
        match self {
            Self::Done { details, .. } => details,
            Self::Skipped { details, .. } => details,
            Self::Failed { details, .. } => details,
        }
    }

    /// Gets a single detail field
    pub fn detail(&self, key: &str) -> Option<&JsonValue> {
        self.details().get(key)
    }

    fn details_mut(&mut self) -> &mut Details {
        match self {
            Self::Done { details, .. } => details,
            Self::Skipped { details, .. } => details,
            Self::Failed { details, .. } => details,
        }
    }
}

impl From<DeployError> for Outcome {
    fn from(error: DeployError) -> Self {
        Self::failed(error)
    }
}

impl Outcome {
    /// Writes the envelope and details into an already open map
    ///
    /// Details whose key is in `taken` are left out, so an enclosing record
    /// can own those keys.
    pub fn serialize_entries<M: SerializeMap>(&self, map: &mut M, taken: &[&str]) -> Result<(), M::Error> {
        map.serialize_entry("success", &self.is_success())?;
        map.serialize_entry("changed", &self.is_changed())?;
        if self.is_skipped() {
            map.serialize_entry("skipped", &true)?;
        }
        if let Some(error) = self.error() {
            map.serialize_entry("error", &error.to_string())?;
            map.serialize_entry("error_kind", error.kind())?;
            if error.is_timeout() {
                map.serialize_entry("timeout", &true)?;
            }
        }
        if let Some(message) = self.message() {
            map.serialize_entry("message", message)?;
        }
        for (key, value) in self.details() {
            let key = key.as_str();
            if !RESERVED_KEYS.contains(&key) && !taken.contains(&key) {
                map.serialize_entry(key, value)?;
            }
        }
        Ok(())
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        self.serialize_entries(&mut map, &[])?;
        map.end()
    }
}

/// Collects the sub-step outcomes of a phase
///
/// The aggregate is failed iff any non-skipped step failed, changed iff any
/// step changed, and skipped when every recorded step was skipped.
#[derive(Debug, Default)]
pub struct Steps {
    entries: Vec<(String, Outcome)>,
}

impl Steps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a named step and returns whether it succeeded
    pub fn record(&mut self, name: impl Into<String>, outcome: Outcome) -> bool {
        let success = outcome.is_success();
        self.entries.push((name.into(), outcome));
        success
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn any_changed(&self) -> bool {
        self.entries.iter().any(|(_, o)| o.is_changed())
    }

    pub fn failed_steps(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|(step, _)| step == name)
            .map(|(_, outcome)| outcome)
    }

    /// Folds the steps into one outcome
    ///
    /// # Arguments
    /// * `message` - Message used when the aggregate succeeds
    pub fn finish(self, message: impl Into<String>) -> Outcome {
        let failed = self.failed_steps();
        let changed = self.any_changed();
        let all_skipped = !self.entries.is_empty() && self.entries.iter().all(|(_, o)| o.is_skipped());

        let first_error = self
            .entries
            .iter()
            .find_map(|(_, o)| o.error().cloned());

        let steps: Vec<JsonValue> = self
            .entries
            .iter()
            .map(|(name, outcome)| {
                let mut value = serde_json::to_value(outcome).unwrap_or(JsonValue::Null);
                if let JsonValue::Object(ref mut obj) = value {
                    obj.insert("step".to_string(), JsonValue::String(name.clone()));
                }
                value
            })
            .collect();

        let outcome = match first_error {
            Some(error) => Outcome::failed(error).with("failed_steps", &failed),
            None if all_skipped => Outcome::skipped(message),
            None => Outcome::done(changed, message),
        };
        outcome.with("steps", steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_protocol(outcome: &Outcome) {
        let json = serde_json::to_value(outcome).unwrap();
        let success = json["success"].as_bool().unwrap();
        let changed = json["changed"].as_bool().unwrap();
        if !success {
            assert!(!json["error"].as_str().unwrap().is_empty());
        }
        if changed {
            assert!(success);
        }
    }

    #[test]
    fn test_outcome_envelope() {
        let outcome = Outcome::changed("Network created").with("network", "traefik_reverse_proxy");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["changed"], true);
        assert_eq!(json["network"], "traefik_reverse_proxy");
        assert!(json.get("skipped").is_none());
        assert_protocol(&outcome);
    }

    #[test]
    fn test_failed_outcome_has_error_and_timeout_flag() {
        let outcome = Outcome::failed(DeployError::Timeout {
            command: "docker compose up".to_string(),
            seconds: 300,
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["changed"], false);
        assert_eq!(json["timeout"], true);
        assert_eq!(json["error_kind"], "timeout");
        assert_protocol(&outcome);
    }

    #[test]
    fn test_details_cannot_override_envelope() {
        let outcome = Outcome::skipped("Customer state is not 'up'").with("success", false);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["skipped"], true);
    }

    #[test]
    fn test_steps_failure_wins() {
        let mut steps = Steps::new();
        steps.record("gateway", Outcome::changed("cloned"));
        steps.record("portal", Outcome::skipped("update disabled"));
        steps.record("lms", Outcome::failed(DeployError::NotFound("lms".to_string())));

        let outcome = steps.finish("done");
        assert!(!outcome.is_success());
        assert!(!outcome.is_changed());
        assert_eq!(outcome.detail("failed_steps").unwrap(), &serde_json::json!(["lms"]));
        assert_protocol(&outcome);
    }

    #[test]
    fn test_steps_all_skipped() {
        let mut steps = Steps::new();
        steps.record("a", Outcome::skipped("x"));
        steps.record("b", Outcome::skipped("y"));
        assert!(steps.finish("nothing to do").is_skipped());
    }

    #[test]
    fn test_steps_changed_when_any_changed() {
        let mut steps = Steps::new();
        steps.record("a", Outcome::unchanged("exists"));
        steps.record("b", Outcome::changed("created"));
        steps.record("c", Outcome::skipped("gated"));
        let outcome = steps.finish("ok");
        assert!(outcome.is_success());
        assert!(outcome.is_changed());
        assert_eq!(outcome.detail("steps").unwrap().as_array().unwrap().len(), 3);
    }
}
