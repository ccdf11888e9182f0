//! Phases 09 and 15: customer backup scripts
//!
//! Phase 15 renders the volume and database backup scripts into
//! `<backup_path>/<host>/`. Phase 09 runs whatever scripts are already there,
//! both at once, before new containers replace the old ones.

use async_trait::async_trait;
use deckhand_core::{Outcome, Steps, Vars};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::phases::render_template_file;
use crate::process::CommandSpec;
use crate::services::Services;
use crate::task::Phase;

const SCRIPTS: [&str; 2] = ["backup_volumes", "backup_databases"];
const SCRIPT_MODE: u32 = 0o755;
const BACKUP_TIMEOUT: Duration = Duration::from_secs(1800);

fn backup_enabled(vars: &Vars, services: &Services) -> bool {
    vars.bool_or("customer_backup_enabled", services.config.backup.enabled)
}

fn host_backup_dir(vars: &Vars, services: &Services) -> PathBuf {
    let base = vars
        .get_str("backup_path")
        .map(PathBuf::from)
        .unwrap_or_else(|| services.config.backup.path.clone());
    base.join(vars.str_or("inventory_hostname", ""))
}

/// Runs the pre-deploy backup scripts
pub struct PreDeployBackupPhase;

impl PreDeployBackupPhase {
    async fn run_script(services: &Services, script: &Path) -> Outcome {
        if !script.is_file() {
            warn!("Backup script not found: {}", script.display());
            return Outcome::skipped(format!("Script not found: {}", script.display()));
        }

        if !services.files.is_executable(script) {
            if let Err(e) = services.files.set_mode(script, SCRIPT_MODE) {
                return Outcome::failed(e);
            }
        }

        info!("Running backup script {}", script.display());
        let spec = CommandSpec::new("bash")
            .arg(script.to_string_lossy())
            .timeout(BACKUP_TIMEOUT);
        match services.runner.run_checked(spec).await {
            Ok(output) => Outcome::changed(format!("Backup script {} completed", script.display()))
                .with("script", script.to_string_lossy())
                .with("stdout", output.stdout.trim()),
            Err(e) => Outcome::failed(e).with("script", script.to_string_lossy()),
        }
    }
}

#[async_trait]
impl Phase for PreDeployBackupPhase {
    fn name(&self) -> &'static str {
        "task_09_pre_deploy_backup"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["backup", "deploy"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        if !backup_enabled(vars, services) {
            info!("Backup is disabled, skipping pre-deploy backup");
            return Outcome::skipped("Backup is disabled");
        }

        let dir = host_backup_dir(vars, services);
        let volumes = dir.join("backup_volumes.sh");
        let databases = dir.join("backup_databases.sh");

        let (volumes_outcome, databases_outcome) = tokio::join!(
            Self::run_script(services, &volumes),
            Self::run_script(services, &databases)
        );

        let mut steps = Steps::new();
        steps.record("backup_volumes", volumes_outcome);
        steps.record("backup_databases", databases_outcome);
        steps.finish("Pre-deploy backup completed")
    }
}

/// Renders the backup scripts for a host
pub struct BackupScriptsPhase;

#[async_trait]
impl Phase for BackupScriptsPhase {
    fn name(&self) -> &'static str {
        "task_15_copy_backup_scripts"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["backup", "cron"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        if !backup_enabled(vars, services) {
            return Outcome::skipped("Backup is disabled");
        }

        let templates = vars
            .get_str("backup_scripts_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| services.config.backup_scripts_dir());
        let dest_dir = host_backup_dir(vars, services);

        let mut steps = Steps::new();
        for script in SCRIPTS {
            let outcome = render_template_file(
                services,
                &templates.join(format!("{}.sh.j2", script)),
                &dest_dir.join(format!("{}.sh", script)),
                vars,
                SCRIPT_MODE,
                true,
            );
            steps.record(script, outcome);
        }
        steps
            .finish(format!("Backup scripts deployed to {}", dest_dir.display()))
            .with("backup_dir", dest_dir.to_string_lossy())
    }
}
