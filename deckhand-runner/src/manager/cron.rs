//! Crontab management
//!
//! Jobs are kept as structured [`CronJobSpec`] records. The system crontab is
//! the store: it is read whole, parsed, changed in memory and written back
//! whole with `crontab -`. Each managed job is preceded by a marker line
//! carrying its id, so identity never depends on the command text.

use deckhand_core::domain::cron::{CronJobSpec, CronSchedule};
use deckhand_core::{DeployError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::process::{CommandRunner, CommandSpec};

const MARKER_PREFIX: &str = "# deckhand:";
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

const PREAMBLE: [&str; 3] = [
    "SHELL=/bin/bash",
    "PATH=/usr/local/sbin:/usr/local/bin:/sbin:/bin:/usr/sbin:/usr/bin",
    "MAILTO=\"\"",
];

/// Parsed crontab of one user
///
/// Lines deckhand does not manage (other jobs, `@reboot` entries, comments,
/// environment assignments) are kept verbatim in `foreign` and written back
/// in their original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronTable {
    pub managed: Vec<CronJobSpec>,
    pub foreign: Vec<String>,
}

impl CronTable {
    pub fn find(&self, id: &str) -> Option<&CronJobSpec> {
        self.managed.iter().find(|job| job.id == id)
    }
}

/// What [`CronManager::set_job`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CronChange {
    Added,
    Updated,
    Unchanged,
}

impl CronChange {
    pub fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

/// Splits a job line into its five schedule fields and the untouched rest
fn split_job_line(line: &str) -> Option<(String, &str)> {
    let mut fields = Vec::with_capacity(5);
    let mut rest = line.trim_start();
    for _ in 0..5 {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        return None;
    }
    Some((fields.join(" "), rest))
}

fn is_preamble(line: &str) -> bool {
    PREAMBLE.contains(&line)
}

/// Parses crontab text
///
/// A marker line tags the job line that follows it as managed. Every other
/// non-blank line is foreign and kept as written, except the preamble lines
/// deckhand itself emits.
pub fn parse_crontab(content: &str, user: &str) -> CronTable {
    let mut table = CronTable::default();
    let mut pending: Option<(String, String)> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || is_preamble(line) {
            continue;
        }

        if let Some(rest) = line.strip_prefix(MARKER_PREFIX) {
            let (id, label) = rest.split_once(' ').unwrap_or((rest, rest));
            pending = Some((id.trim().to_string(), label.trim().to_string()));
            continue;
        }

        let Some((id, label)) = pending.take() else {
            table.foreign.push(raw.trim_end().to_string());
            continue;
        };

        let managed = split_job_line(line).and_then(|(schedule, command)| {
            CronSchedule::parse(&schedule).ok().map(|schedule| CronJobSpec {
                id,
                label,
                schedule,
                command: command.to_string(),
                user: user.to_string(),
            })
        });
        match managed {
            Some(job) => table.managed.push(job),
            None => {
                debug!("Marker not followed by a valid job line: {}", line);
                table.foreign.push(raw.trim_end().to_string());
            }
        }
    }

    table
}

/// Renders a table back to crontab text
///
/// Preamble assignments are only emitted for variables the foreign lines do
/// not already set.
pub fn render_crontab(table: &CronTable) -> String {
    let mut lines: Vec<String> = PREAMBLE
        .iter()
        .filter(|entry| {
            let key = entry.split_once('=').map_or(**entry, |(key, _)| key);
            !table
                .foreign
                .iter()
                .any(|line| line.trim_start().strip_prefix(key).is_some_and(|r| r.starts_with('=')))
        })
        .map(|l| l.to_string())
        .collect();
    lines.push(String::new());

    lines.extend(table.foreign.iter().cloned());
    for job in &table.managed {
        lines.push(format!("{}{} {}", MARKER_PREFIX, job.id, job.label));
        lines.push(format!("{} {}", job.schedule, job.command));
    }

    let mut content = lines.join("\n");
    content.push('\n');
    content
}

/// Reads and rewrites user crontabs
pub struct CronManager {
    runner: Arc<dyn CommandRunner>,
}

impl CronManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn crontab(user: &str) -> CommandSpec {
        let spec = CommandSpec::new("crontab");
        if user == "root" {
            spec
        } else {
            spec.args(["-u", user])
        }
    }

    /// Reads and parses the crontab of `user`
    pub async fn read(&self, user: &str) -> Result<CronTable> {
        let spec = Self::crontab(user).arg("-l");
        let output = self.runner.run(spec.clone()).await?;

        if !output.success() {
            if output.stderr.contains("no crontab for") {
                debug!("No crontab for {}", user);
                return Ok(CronTable::default());
            }
            return output.check(&spec).map(|_| CronTable::default());
        }
        Ok(parse_crontab(&output.stdout, user))
    }

    /// Replaces the whole crontab of `user`
    pub async fn write(&self, user: &str, table: &CronTable) -> Result<()> {
        let spec = Self::crontab(user)
            .arg("-")
            .stdin(render_crontab(table))
            .timeout(WRITE_TIMEOUT);
        self.runner.run_checked(spec).await?;
        debug!("Crontab for {} rewritten ({} managed job(s))", user, table.managed.len());
        Ok(())
    }

    /// Lists the managed jobs of `user`
    pub async fn list_jobs(&self, user: &str) -> Result<Vec<CronJobSpec>> {
        Ok(self.read(user).await?.managed)
    }

    /// Installs or replaces a job, matched by id
    pub async fn set_job(&self, job: &CronJobSpec) -> Result<CronChange> {
        job.schedule.validate()?;
        if job.command.trim().is_empty() {
            return Err(DeployError::validation(vec![format!(
                "Cron job '{}' has an empty command",
                job.label
            )]));
        }

        let mut table = self.read(&job.user).await?;
        let change = match table.managed.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) if existing == job => CronChange::Unchanged,
            Some(existing) => {
                *existing = job.clone();
                CronChange::Updated
            }
            None => {
                table.managed.push(job.clone());
                CronChange::Added
            }
        };

        if change.changed() {
            self.write(&job.user, &table).await?;
            info!("Cron job '{}' {:?} for {}", job.label, change, job.user);
        } else {
            debug!("Cron job '{}' already up to date", job.label);
        }
        Ok(change)
    }

    /// Removes a job by id
    ///
    /// # Returns
    /// false if no such job existed
    pub async fn remove_job(&self, id: &str, user: &str) -> Result<bool> {
        let mut table = self.read(user).await?;
        let before = table.managed.len();
        table.managed.retain(|job| job.id != id);

        if table.managed.len() == before {
            debug!("Cron job {} not present for {}", id, user);
            return Ok(false);
        }

        self.write(user, &table).await?;
        info!("Removed cron job {} for {}", id, user);
        Ok(true)
    }
}
