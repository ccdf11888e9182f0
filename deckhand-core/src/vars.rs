//! Deployment variables
//!
//! The flat key-value map every phase consumes. Values come from the customer
//! registry, configuration defaults, CLI overrides and facts exported by earlier
//! phases of the same run.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::domain::customer::CustomerState;

/// Normalizes a raw tabular value
///
/// Boolean-like strings (`true/yes/1`, `false/no/0`) become booleans and empty
/// strings become null; everything else stays a string.
pub fn normalize_value(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    match trimmed.to_lowercase().as_str() {
        "" => JsonValue::Null,
        "true" | "yes" | "1" => JsonValue::Bool(true),
        "false" | "no" | "0" => JsonValue::Bool(false),
        _ => JsonValue::String(trimmed.to_string()),
    }
}

/// Renders a value back to its flat string form
pub fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Variable map for a single customer deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars(BTreeMap<String, JsonValue>);

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`Vars::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a variable only when it is absent or null
    pub fn set_default(&mut self, key: &str, value: impl Into<JsonValue>) {
        if self.get(key).is_none() {
            self.0.insert(key.to_string(), value.into());
        }
    }

    /// Copies every variable of `other` over this map
    pub fn extend(&mut self, other: &Vars) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Gets a variable; null counts as absent
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Gets a variable as a non-empty string
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(value_to_string)
            .filter(|s| !s.trim().is_empty())
    }

    /// Gets a variable as a string with a fallback
    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }

    /// Interprets a variable as a boolean flag
    ///
    /// Unset variables are false.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(JsonValue::String(s)) => {
                matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1")
            }
            _ => false,
        }
    }

    /// Interprets a variable as a boolean flag with a default for unset values
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        if self.contains(key) {
            self.get_bool(key)
        } else {
            default
        }
    }

    /// Parses a variable as an unsigned integer
    ///
    /// Booleans count as 1 and 0, since registry and `--set` values of "1" and
    /// "0" are normalized to booleans.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::Bool(b) => Some(u64::from(*b)),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Lists every required key that is missing
    ///
    /// # Returns
    /// One message per missing key, empty when all are present
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|key| self.get_str(key).is_none())
            .map(|key| format!("Missing required parameter: {}", key))
            .collect()
    }

    /// Parsed `customer_state`, if present and valid
    pub fn customer_state(&self) -> Option<CustomerState> {
        self.get_str("customer_state")?.parse().ok()
    }

    /// True when the customer should be provisioned
    pub fn is_up(&self) -> bool {
        self.customer_state() == Some(CustomerState::Up)
    }

    /// The inventory host name of the customer
    pub fn host(&self) -> Option<String> {
        self.get_str("inventory_hostname")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, JsonValue>> for Vars {
    fn from(map: BTreeMap<String, JsonValue>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, JsonValue)> for Vars {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
