//! Customer domain types

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::vars::value_to_string;

/// Desired lifecycle state of a customer deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerState {
    /// Provision and maintain
    Up,
    /// Tear down
    Down,
}

impl fmt::Display for CustomerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomerState::Up => write!(f, "up"),
            CustomerState::Down => write!(f, "down"),
        }
    }
}

impl FromStr for CustomerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(CustomerState::Up),
            "down" => Ok(CustomerState::Down),
            other => Err(format!("customer_state must be 'up' or 'down', got '{}'", other)),
        }
    }
}

/// One row of the customer registry
///
/// `customer_name` is the unique key. Every other column is kept as a free-form
/// variable; well-known ones have typed accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, JsonValue>,
}

impl CustomerRecord {
    pub fn new(customer_name: impl Into<String>) -> Self {
        Self {
            customer_name: customer_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder for setting a field
    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<JsonValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Gets a field as a non-empty string
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.fields
            .get(key)
            .filter(|v| !v.is_null())
            .map(value_to_string)
            .filter(|s| !s.is_empty())
    }

    /// Interprets a field as a boolean flag
    pub fn flag(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "1"),
            _ => false,
        }
    }

    pub fn host(&self) -> Option<String> {
        self.get_str("host")
    }

    pub fn domain(&self) -> Option<String> {
        self.get_str("customer_domain")
    }

    pub fn project_path(&self) -> Option<String> {
        self.get_str("project_path")
    }

    /// Parsed `customer_state`; None when absent or invalid
    pub fn state(&self) -> Option<CustomerState> {
        self.get_str("customer_state")?.parse().ok()
    }

    /// Container name filters, split on commas
    pub fn containers(&self) -> Vec<String> {
        self.get_str("customer_containers")
            .map(|raw| {
                raw.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing() {
        assert_eq!("UP".parse::<CustomerState>(), Ok(CustomerState::Up));
        assert_eq!("down".parse::<CustomerState>(), Ok(CustomerState::Down));
        assert!("paused".parse::<CustomerState>().is_err());
        assert_eq!(CustomerState::Down.to_string(), "down");
    }

    #[test]
    fn test_record_accessors() {
        let record = CustomerRecord::new("acme")
            .with("host", "acme01")
            .with("customer_state", "up")
            .with("customer_containers", "acme, acme-extra,")
            .with("customer_backup_enabled", true)
            .with("customer_domain", JsonValue::Null);

        assert_eq!(record.host().as_deref(), Some("acme01"));
        assert_eq!(record.state(), Some(CustomerState::Up));
        assert_eq!(record.containers(), vec!["acme", "acme-extra"]);
        assert!(record.flag("customer_backup_enabled"));
        assert!(!record.flag("customer_test_enabled"));
        assert!(record.domain().is_none());
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = CustomerRecord::new("acme").with("host", "acme01");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["customer_name"], "acme");
        assert_eq!(json["host"], "acme01");
    }
}
