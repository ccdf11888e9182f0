//! Resource managers
//!
//! Each manager wraps one external system and reports failures as
//! [`deckhand_core::DeployError`]. Phases turn those into outcomes.

pub mod cron;
pub mod docker;
pub mod files;
pub mod git;
pub mod network;
pub mod ssh;

pub use cron::{CronChange, CronManager};
pub use docker::{ContainerFilter, ContainerInfo, DockerManager};
pub use files::{FileManager, WriteReport};
pub use git::{GitAction, GitManager, GitSync};
pub use network::{NetworkProbe, ScanReport};
pub use ssh::{SshManager, SshSession};
