//! Customer registry command handlers
//!
//! Handles listing, inspecting, editing, validating and searching the
//! customers of the CSV registry.

use anyhow::{Context, Result};
use clap::Subcommand;
use deckhand_core::domain::customer::{CustomerRecord, CustomerState};
use serde_json::json;
use tracing::info;

use super::{fields_from_pairs, parse_key_val};
use crate::config::Config;
use crate::output::{print_json, print_with_status};

/// Customer subcommands
#[derive(Subcommand)]
pub enum CustomerCommands {
    /// List customer names
    List {
        /// Only customers in this state (up or down)
        #[arg(long)]
        state: Option<String>,
    },
    /// Show one customer record
    Get {
        name: String,
    },
    /// Add a customer (merges into an existing one)
    Add {
        name: String,

        /// Fields as key=value pairs
        #[arg(short, long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },
    /// Update fields of an existing customer
    Update {
        name: String,

        /// Fields as key=value pairs
        #[arg(short, long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },
    /// Delete a customer
    Delete {
        name: String,
    },
    /// Validate one customer, or all when no name is given
    Validate {
        name: Option<String>,
    },
    /// Search name, host and domain
    Search {
        term: String,
    },
    /// Summarize one customer, or all when no name is given
    Summary {
        name: Option<String>,
    },
}

/// Handle customer commands
///
/// # Arguments
/// * `command` - The customer command to execute
/// * `config` - The CLI configuration
pub fn handle_customer_command(command: CustomerCommands, config: &Config) -> Result<bool> {
    let mut registry = config.registry()?;

    match command {
        CustomerCommands::List { state } => {
            let state = state
                .map(|s| s.parse::<CustomerState>().map_err(anyhow::Error::msg))
                .transpose()?;
            let customers = registry.list(state);
            print_json(&json!({
                "success": true,
                "count": customers.len(),
                "customers": customers,
            }))?;
            Ok(true)
        }
        CustomerCommands::Get { name } => {
            let record = registry
                .get(&name)
                .with_context(|| format!("Customer {} not found", name))?;
            print_with_status(true, record)
        }
        CustomerCommands::Add { name, set } => {
            let mut record = CustomerRecord::new(name.clone());
            record.fields = fields_from_pairs(set);
            let created = registry.add(record)?;
            info!("Customer {} {}", name, if created { "added" } else { "updated" });
            print_json(&json!({ "success": true, "customer": name, "created": created }))?;
            Ok(true)
        }
        CustomerCommands::Update { name, set } => {
            registry.update(&name, fields_from_pairs(set))?;
            info!("Customer {} updated", name);
            print_json(&json!({ "success": true, "customer": name }))?;
            Ok(true)
        }
        CustomerCommands::Delete { name } => {
            registry.delete(&name)?;
            info!("Customer {} deleted", name);
            print_json(&json!({ "success": true, "customer": name }))?;
            Ok(true)
        }
        CustomerCommands::Validate { name: Some(name) } => {
            let validation = registry.validate(&name);
            print_with_status(validation.valid, &validation)
        }
        CustomerCommands::Validate { name: None } => {
            let results = registry.validate_all();
            let valid = results.iter().all(|r| r.valid);
            print_with_status(valid, &json!({ "count": results.len(), "results": results }))
        }
        CustomerCommands::Search { term } => {
            let results = registry.search(&term);
            print_with_status(true, &json!({ "count": results.len(), "results": results }))
        }
        CustomerCommands::Summary { name: Some(name) } => {
            let summary = registry
                .summary(&name)
                .with_context(|| format!("Customer {} not found", name))?;
            print_with_status(true, &summary)
        }
        CustomerCommands::Summary { name: None } => {
            let summaries: Vec<_> = registry
                .list(None)
                .iter()
                .filter_map(|name| registry.summary(name))
                .collect();
            print_with_status(
                true,
                &json!({
                    "total": registry.len(),
                    "active": registry.active().len(),
                    "customers": summaries,
                }),
            )
        }
    }
}
