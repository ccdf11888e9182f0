//! Phase 16: nightly backup jobs

use async_trait::async_trait;
use deckhand_core::domain::cron::{job_id, CronJobSpec, CronSchedule};
use deckhand_core::{Outcome, Steps, Vars};
use std::path::PathBuf;
use tracing::info;

use crate::manager::CronChange;
use crate::phases::{backup_job_labels, cron_user};
use crate::services::Services;
use crate::task::Phase;

const VOLUMES_SCHEDULE: &str = "0 2 * * *";
const DATABASES_SCHEDULE: &str = "30 2 * * *";

/// Installs (or, with backups disabled, removes) the backup cron jobs
pub struct CronPhase;

impl CronPhase {
    /// Builds both job definitions for a customer
    pub fn jobs(vars: &Vars, user: &str) -> deckhand_core::Result<Vec<CronJobSpec>> {
        let host = vars.str_or("inventory_hostname", "");
        let backup_dir = PathBuf::from(vars.str_or("backup_path", "/backup")).join(&host);
        let log = PathBuf::from(vars.str_or("log_path", "/var/log")).join("backup/cron.log");
        let [volumes_label, databases_label] = backup_job_labels(&host);

        let entries = [
            (volumes_label, "customer_backup_cron_volumes", VOLUMES_SCHEDULE, "backup_volumes.sh"),
            (databases_label, "customer_backup_cron_databases", DATABASES_SCHEDULE, "backup_databases.sh"),
        ];

        entries
            .into_iter()
            .map(|(label, schedule_var, default_schedule, script)| {
                let schedule = CronSchedule::parse(&vars.str_or(schedule_var, default_schedule))?;
                let command = format!(
                    "/bin/bash {} >> {} 2>&1",
                    backup_dir.join(script).display(),
                    log.display()
                );
                Ok(CronJobSpec::new(label, schedule, command, user))
            })
            .collect()
    }
}

#[async_trait]
impl Phase for CronPhase {
    fn name(&self) -> &'static str {
        "task_16_setup_cron"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["cron", "backup"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let user = cron_user(vars, services);
        let host = vars.str_or("inventory_hostname", "");
        let enabled = vars.bool_or("customer_backup_enabled", services.config.backup.enabled);
        let mut steps = Steps::new();

        if !enabled {
            info!("Backup disabled for {}, removing cron jobs", host);
            for label in backup_job_labels(&host) {
                let outcome = match services.cron.remove_job(&job_id(&label), &user).await {
                    Ok(true) => Outcome::changed(format!("Removed cron job '{}'", label)),
                    Ok(false) => Outcome::unchanged(format!("Cron job '{}' not present", label)),
                    Err(e) => Outcome::failed(e),
                };
                steps.record(label, outcome);
            }
            return steps
                .finish("Backup disabled, cron jobs removed")
                .with("backup_enabled", false);
        }

        let jobs = match Self::jobs(vars, &user) {
            Ok(jobs) => jobs,
            Err(e) => return Outcome::failed(e),
        };

        for job in &jobs {
            let outcome = match services.cron.set_job(job).await {
                Ok(change) => {
                    let verb = match change {
                        CronChange::Added => "added",
                        CronChange::Updated => "updated",
                        CronChange::Unchanged => "unchanged",
                    };
                    Outcome::done(change.changed(), format!("Cron job '{}' {}", job.label, verb))
                        .with("schedule", job.schedule.to_string())
                        .with("command", &job.command)
                }
                Err(e) => Outcome::failed(e),
            };
            steps.record(job.label.clone(), outcome);
        }

        steps
            .finish(format!("Cron jobs configured for {}", host))
            .with("backup_enabled", true)
            .with("cron_user", user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests_support::{services, up_vars};
    use crate::task::execute_phase;
    use crate::testing::FakeRunner;

    fn cron_vars() -> Vars {
        up_vars()
            .with("backup_path", "/backup")
            .with("log_path", "/var/log")
    }

    #[tokio::test]
    async fn test_jobs_installed_once() {
        let runner = FakeRunner::new();
        runner.set_crontab("15 4 * * * /usr/local/bin/rotate-logs\n");
        let services = services(&runner);

        let first = execute_phase(&CronPhase, &cron_vars(), &services).await;
        assert!(first.success(), "{:?}", first.outcome);
        assert!(first.outcome.is_changed());

        let crontab = runner.crontab().unwrap();
        assert!(crontab.contains("/usr/local/bin/rotate-logs"));
        assert!(crontab.contains(
            "0 2 * * * /bin/bash /backup/acme01/backup_volumes.sh >> /var/log/backup/cron.log 2>&1"
        ));
        assert!(crontab.contains("30 2 * * * /bin/bash /backup/acme01/backup_databases.sh"));

        let second = execute_phase(&CronPhase, &cron_vars(), &services).await;
        assert!(second.success());
        assert!(!second.outcome.is_changed());
    }

    #[tokio::test]
    async fn test_custom_schedule_and_invalid_schedule() {
        let runner = FakeRunner::new();
        let vars = cron_vars().with("customer_backup_cron_volumes", "0 3 * * 0");
        let result = execute_phase(&CronPhase, &vars, &services(&runner)).await;
        assert!(result.success());
        assert!(runner.crontab().unwrap().contains("0 3 * * 0 /bin/bash"));

        let bad = cron_vars().with("customer_backup_cron_databases", "61 2 * * *");
        let result = execute_phase(&CronPhase, &bad, &services(&runner)).await;
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_backup_disabled_removes_jobs() {
        let runner = FakeRunner::new();
        let services = services(&runner);
        execute_phase(&CronPhase, &cron_vars(), &services).await;

        let disabled = cron_vars().with("customer_backup_enabled", false);
        let result = execute_phase(&CronPhase, &disabled, &services).await;
        assert!(result.success());
        assert!(result.outcome.is_changed());
        assert!(!runner.crontab().unwrap().contains("backup_volumes.sh"));
    }
}
