//! Core domain types
//!
//! These types describe a deployment run and are shared between the runner
//! (which produces them) and the CLI (which prints them).

pub mod cron;
pub mod customer;
pub mod outcome;
pub mod pipeline;
pub mod project;
pub mod task;
