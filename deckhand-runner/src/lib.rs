//! Deckhand Runner
//!
//! Executes customer deployments against the local host.
//!
//! This crate contains:
//! - Configuration and the injected manager set ([`services::Services`])
//! - The process execution seam and bounded retry
//! - Resource managers for docker, git, cron, files, ssh and network probes
//! - The phase contract, the eighteen pipeline phases and the orchestrator
//! - The CSV-backed customer registry

pub mod config;
pub mod manager;
pub mod orchestrator;
pub mod phases;
pub mod process;
pub mod registry;
pub mod retry;
pub mod services;
pub mod task;

#[cfg(test)]
mod testing;
