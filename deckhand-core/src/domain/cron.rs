//! Scheduled job records
//!
//! Jobs are structured records identified by an explicit id. Crontab syntax is
//! only produced when a record is written to the system crontab.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DeployError;

/// Five-field cron schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub minute: String,
    pub hour: String,
    pub day: String,
    pub month: String,
    pub weekday: String,
}

impl CronSchedule {
    /// Parses and validates a schedule expression
    ///
    /// Expressions with fewer than five fields are padded with `*`.
    pub fn parse(expr: &str) -> Result<Self, DeployError> {
        let mut parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.is_empty() || parts.len() > 5 {
            return Err(DeployError::validation(vec![format!(
                "Invalid cron schedule '{}': expected 5 fields, got {}",
                expr,
                parts.len()
            )]));
        }
        while parts.len() < 5 {
            parts.push("*");
        }

        let schedule = Self {
            minute: parts[0].to_string(),
            hour: parts[1].to_string(),
            day: parts[2].to_string(),
            month: parts[3].to_string(),
            weekday: parts[4].to_string(),
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Checks every field against its allowed range
    pub fn validate(&self) -> Result<(), DeployError> {
        let fields = [
            ("minute", &self.minute, 0, 59),
            ("hour", &self.hour, 0, 23),
            ("day", &self.day, 1, 31),
            ("month", &self.month, 1, 12),
            ("weekday", &self.weekday, 0, 7),
        ];

        let errors: Vec<String> = fields
            .iter()
            .filter(|(_, value, min, max)| !valid_field(value, *min, *max))
            .map(|(name, value, _, _)| format!("Invalid {}: {}", name, value))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DeployError::validation(errors))
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day, self.month, self.weekday
        )
    }
}

fn valid_field(part: &str, min: u32, max: u32) -> bool {
    if part == "*" {
        return true;
    }
    if part.contains(',') {
        return part.split(',').all(|p| valid_field(p.trim(), min, max));
    }
    if let Some((range, step)) = part.split_once('/') {
        let Ok(step) = step.trim().parse::<u32>() else {
            return false;
        };
        if range == "*" {
            return (1..=max).contains(&step);
        }
        if let Some((start, end)) = parse_range(range) {
            return min <= start && end <= max && start <= end && step >= 1 && step <= end - start + 1;
        }
        return match range.trim().parse::<u32>() {
            Ok(value) => (min..=max).contains(&value) && (1..=max).contains(&step),
            Err(_) => false,
        };
    }
    if part.contains('-') {
        return match parse_range(part) {
            Some((start, end)) => min <= start && end <= max && start <= end,
            None => false,
        };
    }
    part.parse::<u32>()
        .map(|value| (min..=max).contains(&value))
        .unwrap_or(false)
}

fn parse_range(part: &str) -> Option<(u32, u32)> {
    let (start, end) = part.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// A scheduled job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronJobSpec {
    /// Stable identity, derived from the label
    pub id: String,
    /// Human-readable name, e.g. `Backup Volumes (acme01)`
    pub label: String,
    pub schedule: CronSchedule,
    pub command: String,
    pub user: String,
}

impl CronJobSpec {
    pub fn new(
        label: impl Into<String>,
        schedule: CronSchedule,
        command: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        let label = label.into();
        Self {
            id: job_id(&label),
            label,
            schedule,
            command: command.into(),
            user: user.into(),
        }
    }
}

/// Derives a job id from its label
///
/// Lowercases and collapses every non-alphanumeric run into a single `-`:
/// `Backup Volumes (acme01)` -> `backup-volumes-acme01`.
pub fn job_id(label: &str) -> String {
    let mut id = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
        } else if !id.ends_with('-') && !id.is_empty() {
            id.push('-');
        }
    }
    id.trim_end_matches('-').to_string()
}
