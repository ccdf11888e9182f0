//! Deckhand Core
//!
//! Core types and abstractions for the deckhand deployment tool.
//!
//! This crate contains:
//! - Domain types: outcomes, task results, customers, projects, cron jobs, pipeline runs
//! - Variables: the flat per-customer key-value map and its `{{ var }}` templating
//! - Errors: the deployment error taxonomy

pub mod domain;
pub mod error;
pub mod template;
pub mod vars;

pub use domain::outcome::{Details, Outcome, Steps};
pub use error::{DeployError, Result};
pub use vars::Vars;
