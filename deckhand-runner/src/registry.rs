//! Customer registry
//!
//! A flat CSV file with one row per customer, keyed by `customer_name`.
//! - Values are normalized on load (boolean-like strings become booleans,
//!   empty cells become null)
//! - Every mutation rewrites the whole file; the header is the sorted union
//!   of all customers' columns

use deckhand_core::domain::customer::{CustomerRecord, CustomerState};
use deckhand_core::domain::project::CATALOGUE;
use deckhand_core::vars::{normalize_value, value_to_string};
use deckhand_core::{DeployError, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const REQUIRED_FIELDS: [&str; 3] = ["host", "customer_domain", "project_path"];

/// Result of checking one customer record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerValidation {
    pub customer: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Condensed view of a customer
#[derive(Debug, Clone, Serialize)]
pub struct CustomerSummary {
    pub name: String,
    pub host: Option<String>,
    pub domain: Option<String>,
    pub state: Option<String>,
    pub containers: Vec<String>,
    pub backup_enabled: bool,
    pub test_enabled: bool,
    pub project_count: usize,
    pub validation: CustomerValidation,
}

/// One search match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub name: String,
    pub host: Option<String>,
    pub domain: Option<String>,
    pub state: Option<String>,
}

fn csv_error(path: &Path, err: csv::Error) -> DeployError {
    DeployError::Io(format!("{}: {}", path.display(), err))
}

/// CSV-backed customer store
#[derive(Debug, Clone)]
pub struct CustomerRegistry {
    path: PathBuf,
    customers: BTreeMap<String, CustomerRecord>,
}

impl CustomerRegistry {
    /// Loads the registry from `path`
    ///
    /// A missing file yields an empty registry that is created on the first
    /// mutation. Rows without a `customer_name` are dropped with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut registry = Self {
            path,
            customers: BTreeMap::new(),
        };

        if !registry.path.exists() {
            warn!("Customer registry {} does not exist, starting empty", registry.path.display());
            return Ok(registry);
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&registry.path)
            .map_err(|e| csv_error(&registry.path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| csv_error(&registry.path, e))?
            .clone();

        for (line, row) in reader.records().enumerate() {
            let row = row.map_err(|e| csv_error(&registry.path, e))?;
            let mut name = None;
            let mut record = CustomerRecord::new("");
            for (column, raw) in headers.iter().zip(row.iter()) {
                let column = column.trim();
                if column == "customer_name" {
                    name = Some(raw.trim().to_string()).filter(|n| !n.is_empty());
                } else if !column.is_empty() {
                    record.set(column, normalize_value(raw));
                }
            }

            match name {
                Some(name) => {
                    record.customer_name = name.clone();
                    registry.customers.insert(name, record);
                }
                None => warn!("Skipping row {} without customer_name", line + 2),
            }
        }

        info!(
            "Loaded {} customers from {}",
            registry.customers.len(),
            registry.path.display()
        );
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the whole file
    pub fn save(&self) -> Result<()> {
        Self::write_file(&self.path, &self.customers)?;
        info!("Saved {} customers to {}", self.customers.len(), self.path.display());
        Ok(())
    }

    /// Persists `next` and only then makes it the in-memory state
    fn commit(&mut self, next: BTreeMap<String, CustomerRecord>) -> Result<()> {
        Self::write_file(&self.path, &next)?;
        self.customers = next;
        info!("Saved {} customers to {}", self.customers.len(), self.path.display());
        Ok(())
    }

    fn write_file(path: &Path, customers: &BTreeMap<String, CustomerRecord>) -> Result<()> {
        let mut columns: BTreeSet<&str> = BTreeSet::new();
        columns.insert("customer_name");
        for record in customers.values() {
            columns.extend(record.fields.keys().map(String::as_str));
        }
        let columns: Vec<&str> = columns.into_iter().collect();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DeployError::io(format!("creating {}", parent.display()), e))?;
        }

        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp).map_err(|e| csv_error(&tmp, e))?;
            writer.write_record(&columns).map_err(|e| csv_error(&tmp, e))?;
            for record in customers.values() {
                let row: Vec<String> = columns
                    .iter()
                    .map(|column| match *column {
                        "customer_name" => record.customer_name.clone(),
                        other => record.fields.get(other).map(value_to_string).unwrap_or_default(),
                    })
                    .collect();
                writer.write_record(&row).map_err(|e| csv_error(&tmp, e))?;
            }
            writer
                .flush()
                .map_err(|e| DeployError::io(format!("writing {}", tmp.display()), e))?;
        }
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(DeployError::io(format!("replacing {}", path.display()), e));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CustomerRecord> {
        self.customers.get(name)
    }

    pub fn get_by_host(&self, host: &str) -> Option<&CustomerRecord> {
        self.customers
            .values()
            .find(|record| record.host().as_deref() == Some(host))
    }

    /// Customer names, optionally only those in `state`
    pub fn list(&self, state: Option<CustomerState>) -> Vec<String> {
        self.customers
            .values()
            .filter(|record| state.is_none() || record.state() == state)
            .map(|record| record.customer_name.clone())
            .collect()
    }

    /// Customers whose state is `up`
    pub fn active(&self) -> Vec<&CustomerRecord> {
        self.customers
            .values()
            .filter(|record| record.state() == Some(CustomerState::Up))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    /// Adds a customer, merging into the existing record when the name is taken
    ///
    /// # Returns
    /// true when a new customer was created
    pub fn add(&mut self, record: CustomerRecord) -> Result<bool> {
        if record.customer_name.trim().is_empty() {
            return Err(DeployError::validation(vec![
                "Missing required parameter: customer_name".to_string(),
            ]));
        }

        if self.customers.contains_key(&record.customer_name) {
            warn!("Customer '{}' already exists, updating", record.customer_name);
            let CustomerRecord { customer_name, fields } = record;
            self.update(&customer_name, fields)?;
            return Ok(false);
        }

        debug!("Adding customer {}", record.customer_name);
        let mut next = self.customers.clone();
        next.insert(record.customer_name.clone(), record);
        self.commit(next)?;
        Ok(true)
    }

    /// Merges `updates` into an existing customer and saves
    pub fn update(&mut self, name: &str, updates: BTreeMap<String, JsonValue>) -> Result<()> {
        let mut next = self.customers.clone();
        let record = next
            .get_mut(name)
            .ok_or_else(|| DeployError::NotFound(format!("customer {}", name)))?;
        record.fields.extend(updates);
        self.commit(next)
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        let mut next = self.customers.clone();
        if next.remove(name).is_none() {
            return Err(DeployError::NotFound(format!("customer {}", name)));
        }
        self.commit(next)
    }

    /// Container name filters of a customer
    pub fn containers(&self, name: &str) -> Vec<String> {
        self.get(name).map(CustomerRecord::containers).unwrap_or_default()
    }

    pub fn validate(&self, name: &str) -> CustomerValidation {
        let Some(record) = self.get(name) else {
            return CustomerValidation {
                customer: name.to_string(),
                valid: false,
                errors: vec![format!("Customer {} not found", name)],
                warnings: Vec::new(),
            };
        };

        let errors: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| record.get_str(field).is_none())
            .map(|field| format!("Missing required field: {}", field))
            .collect();

        let mut warnings = Vec::new();
        if let Some(domain) = record.domain() {
            if !domain.contains('.') {
                warnings.push(format!("Domain '{}' may not be valid", domain));
            }
        }
        if let Some(project_path) = record.project_path() {
            if !Path::new(&project_path).exists() {
                warnings.push(format!("Project path does not exist: {}", project_path));
            }
        }

        CustomerValidation {
            customer: name.to_string(),
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn validate_all(&self) -> Vec<CustomerValidation> {
        self.customers.keys().map(|name| self.validate(name)).collect()
    }

    pub fn summary(&self, name: &str) -> Option<CustomerSummary> {
        let record = self.get(name)?;
        Some(CustomerSummary {
            name: record.customer_name.clone(),
            host: record.host(),
            domain: record.domain(),
            state: record.get_str("customer_state"),
            containers: record.containers(),
            backup_enabled: record.flag("customer_backup_enabled"),
            test_enabled: record.flag("customer_test_enabled"),
            project_count: CATALOGUE.len(),
            validation: self.validate(name),
        })
    }

    /// Case-insensitive match on name, host and domain
    pub fn search(&self, term: &str) -> Vec<SearchHit> {
        let term = term.to_lowercase();
        self.customers
            .values()
            .filter(|record| {
                [Some(record.customer_name.clone()), record.host(), record.domain()]
                    .into_iter()
                    .flatten()
                    .any(|value| value.to_lowercase().contains(&term))
            })
            .map(|record| SearchHit {
                name: record.customer_name.clone(),
                host: record.host(),
                domain: record.domain(),
                state: record.get_str("customer_state"),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CSV: &str = "customer_name,host,customer_state,customer_domain,project_path,customer_containers,customer_backup_enabled\n\
acme,acme01,up,acme.io,/srv/projects,\"acme,acme-extra\",yes\n\
globex,globex01,down,globex,/nonexistent/globex,globex,no\n\
,orphan01,up,orphan.io,/srv,orphan,no\n";

    fn registry(tmp: &TempDir) -> CustomerRegistry {
        let path = tmp.path().join("customer.csv");
        std::fs::write(&path, CSV).unwrap();
        CustomerRegistry::load(path).unwrap()
    }

    #[test]
    fn test_load_normalizes_values() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);

        assert_eq!(registry.len(), 2);
        let acme = registry.get("acme").unwrap();
        assert_eq!(acme.fields["customer_backup_enabled"], JsonValue::Bool(true));
        assert_eq!(registry.containers("acme"), vec!["acme", "acme-extra"]);
        assert_eq!(registry.get_by_host("globex01").unwrap().customer_name, "globex");
        assert_eq!(registry.list(Some(CustomerState::Down)), vec!["globex"]);
        assert_eq!(registry.active().len(), 1);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let registry = CustomerRegistry::load(tmp.path().join("none.csv")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mutations_rewrite_file_with_union_header() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry(&tmp);

        let created = registry
            .add(CustomerRecord::new("initech").with("host", "initech01").with("zone", "eu"))
            .unwrap();
        assert!(created);

        let merged = registry
            .add(CustomerRecord::new("acme").with("customer_state", "down"))
            .unwrap();
        assert!(!merged);

        registry.delete("globex").unwrap();
        assert!(registry.delete("globex").unwrap_err().is_not_found());

        let content = std::fs::read_to_string(registry.path()).unwrap();
        let header = content.lines().next().unwrap();
        assert_eq!(
            header,
            "customer_backup_enabled,customer_containers,customer_domain,customer_name,customer_state,host,project_path,zone"
        );

        let reloaded = CustomerRegistry::load(registry.path().to_path_buf()).unwrap();
        assert_eq!(reloaded.list(None), vec!["acme", "initech"]);
        assert_eq!(reloaded.get("acme").unwrap().state(), Some(CustomerState::Down));
        assert_eq!(reloaded.get("initech").unwrap().get_str("zone").as_deref(), Some("eu"));
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry(&tmp);

        // A directory in place of the file makes the final rename fail
        std::fs::remove_file(registry.path()).unwrap();
        std::fs::create_dir(registry.path()).unwrap();

        let updates = BTreeMap::from([("customer_state".to_string(), JsonValue::from("down"))]);
        assert!(registry.update("acme", updates).is_err());
        assert_eq!(registry.get("acme").unwrap().state(), Some(CustomerState::Up));

        assert!(registry.delete("globex").is_err());
        assert!(registry.get("globex").is_some());

        assert!(registry.add(CustomerRecord::new("initech").with("host", "initech01")).is_err());
        assert!(registry.get("initech").is_none());
        assert_eq!(registry.len(), 2);
        assert!(!tmp.path().join("customer.csv.tmp").exists());
    }

    #[test]
    fn test_update_unknown_customer_fails() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry(&tmp);
        let err = registry.update("nobody", BTreeMap::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_validation_and_search() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry(&tmp);
        let project_path = tmp.path().to_string_lossy().to_string();
        registry
            .update(
                "acme",
                BTreeMap::from([("project_path".to_string(), JsonValue::String(project_path))]),
            )
            .unwrap();

        let acme = registry.validate("acme");
        assert!(acme.valid);
        assert!(acme.warnings.is_empty());

        let globex = registry.validate("globex");
        assert!(globex.valid);
        assert_eq!(globex.warnings.len(), 2);

        registry.add(CustomerRecord::new("bare").with("host", "bare01")).unwrap();
        let bare = registry.validate("bare");
        assert!(!bare.valid);
        assert_eq!(bare.errors.len(), 2);
        assert!(!registry.validate("ghost").valid);
        assert_eq!(registry.validate_all().len(), 3);

        let hits = registry.search("ACME.IO");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "acme");

        let summary = registry.summary("acme").unwrap();
        assert!(summary.backup_enabled);
        assert_eq!(summary.project_count, 5);
        assert!(registry.summary("ghost").is_none());
    }
}
