//! Pipeline phase catalogue
//!
//! Every deployment step as a [`Phase`] implementation, plus the helpers the
//! phases share:
//! - customer path resolution
//! - idempotent directory creation
//! - `{{ var }}` rendering into files with backups
//! - the cron job labels owned by one customer

pub mod backup;
pub mod config_files;
pub mod cron_jobs;
pub mod deploy;
pub mod e2e;
pub mod images;
pub mod info_files;
pub mod migrations;
pub mod network;
pub mod projects;
pub mod restore;
pub mod scaffold;
pub mod teardown;
pub mod update_services;

use deckhand_core::template::render;
use deckhand_core::{DeployError, Outcome, Vars};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::services::Services;
use crate::task::Phase;

/// Phase names in default execution order
pub const DEFAULT_SEQUENCE: [&str; 18] = [
    "task_00_network",
    "task_01_down_state",
    "task_02_create_dirs",
    "task_03_define_projects",
    "task_04_ensure_project_dirs",
    "task_05_ensure_gateway_docker_init",
    "task_06_update_services",
    "task_07_config_files",
    "task_08_sql_and_uploads",
    "task_09_pre_deploy_backup",
    "task_10_pre_pull_images",
    "task_11_build_customer_images",
    "task_12_deploy_containers",
    "task_13_run_migrations",
    "task_14_write_info_files",
    "task_15_copy_backup_scripts",
    "task_16_setup_cron",
    "task_20_run_tests",
];

/// Every phase, in [`DEFAULT_SEQUENCE`] order
pub fn all_phases() -> Vec<Arc<dyn Phase>> {
    vec![
        Arc::new(network::NetworkPhase),
        Arc::new(teardown::TeardownPhase),
        Arc::new(scaffold::CreateDirsPhase),
        Arc::new(projects::DefineProjectsPhase),
        Arc::new(scaffold::ProjectDirsPhase),
        Arc::new(scaffold::GatewayInitPhase),
        Arc::new(update_services::UpdateServicesPhase),
        Arc::new(config_files::ConfigFilesPhase),
        Arc::new(restore::SqlAndUploadsPhase),
        Arc::new(backup::PreDeployBackupPhase),
        Arc::new(images::PrePullImagesPhase),
        Arc::new(images::BuildImagesPhase),
        Arc::new(deploy::DeployContainersPhase),
        Arc::new(migrations::MigrationsPhase),
        Arc::new(info_files::InfoFilesPhase),
        Arc::new(backup::BackupScriptsPhase),
        Arc::new(cron_jobs::CronPhase),
        Arc::new(e2e::RunTestsPhase),
    ]
}

/// Looks up a phase by name
pub fn find_phase(name: &str) -> Option<Arc<dyn Phase>> {
    all_phases().into_iter().find(|phase| phase.name() == name)
}

/// `<project_path>/<inventory_hostname>`
pub(crate) fn customer_root(vars: &Vars) -> PathBuf {
    PathBuf::from(vars.str_or("project_path", ""))
        .join(vars.str_or("inventory_hostname", ""))
}

/// Creates a directory, reporting whether anything changed
pub(crate) fn ensure_dir(services: &Services, path: &Path, mode: u32) -> Outcome {
    match services.files.create_directory(path, mode, false) {
        Ok(true) => Outcome::changed(format!("Created {}", path.display())),
        Ok(false) => Outcome::unchanged(format!("{} already exists", path.display())),
        Err(e) => Outcome::failed(e),
    }
    .with("path", path.to_string_lossy())
}

/// Labels of the two backup cron jobs installed for a host
pub(crate) fn backup_job_labels(host: &str) -> [String; 2] {
    [
        format!("Backup Volumes ({})", host),
        format!("Backup Databases ({})", host),
    ]
}

/// Crontab owner: the `cron_user` variable, else the configured user
pub(crate) fn cron_user(vars: &Vars, services: &Services) -> String {
    vars.str_or("cron_user", &services.config.cron_user)
}

/// Renders inline template text into `dest`
///
/// Placeholders without a value are left in the output and listed under
/// `unresolved`.
pub(crate) fn render_to_file(
    services: &Services,
    template: &str,
    dest: &Path,
    vars: &Vars,
    mode: u32,
    backup: bool,
) -> Outcome {
    let rendered = render(template, vars);
    if !rendered.unresolved.is_empty() {
        warn!(
            "Unresolved variables in {}: {}",
            dest.display(),
            rendered.unresolved.join(", ")
        );
    }

    let outcome = match services.files.write_file(dest, &rendered.text, mode, backup) {
        Ok(report) => {
            debug!("Wrote {} (changed: {})", dest.display(), report.changed);
            let message = if report.changed {
                format!("Deployed {}", dest.display())
            } else {
                format!("{} is up to date", dest.display())
            };
            let mut outcome = Outcome::done(report.changed, message);
            if let Some(backup) = report.backup {
                outcome = outcome.with("backup_file", backup.to_string_lossy());
            }
            outcome
        }
        Err(e) => Outcome::failed(e),
    };

    let outcome = outcome.with("dest", dest.to_string_lossy());
    if rendered.unresolved.is_empty() {
        outcome
    } else {
        outcome.with("unresolved", &rendered.unresolved)
    }
}

/// Renders a template file into `dest`
pub(crate) fn render_template_file(
    services: &Services,
    template: &Path,
    dest: &Path,
    vars: &Vars,
    mode: u32,
    backup: bool,
) -> Outcome {
    let text = match services.files.read_file(template) {
        Ok(text) => text,
        Err(e) if e.is_not_found() => {
            return Outcome::failed(DeployError::Template(format!(
                "template {} not found",
                template.display()
            )));
        }
        Err(e) => return Outcome::failed(e),
    };
    render_to_file(services, &text, dest, vars, mode, backup).with("src", template.to_string_lossy())
}

#[cfg(test)]
pub(crate) mod tests_support {
    use deckhand_core::Vars;
    use std::path::Path;
    use std::sync::Arc;

    use crate::config::DeployConfig;
    use crate::services::Services;
    use crate::testing::FakeRunner;

    /// Services over a fake runner with default configuration
    pub fn services(runner: &FakeRunner) -> Services {
        let mut config = DeployConfig::new("/nonexistent/resources");
        config.state_dir = std::env::temp_dir().join("deckhand-test-state");
        Services::new(Arc::new(runner.clone()), config)
    }

    /// Services whose resources and state live under `root`
    pub fn fs_services(runner: &FakeRunner, root: &Path) -> Services {
        let mut config = DeployConfig::new(root.join("resources"));
        config.state_dir = root.join("state");
        Services::new(Arc::new(runner.clone()), config)
    }

    /// Writes a file under `<root>/resources/templates`
    pub fn write_template(root: &Path, name: &str, content: &str) {
        write_resource(root, &format!("templates/{}", name), content);
    }

    /// Writes a file under `<root>/resources`
    pub fn write_resource(root: &Path, relative: &str, content: &str) {
        let path = root.join("resources").join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// An `up` customer with no filesystem roots
    pub fn up_vars() -> Vars {
        Vars::new()
            .with("customer_state", "up")
            .with("customer_name", "Acme")
            .with("customer_containers", "acme")
            .with("inventory_hostname", "acme01")
            .with("project_path", "/nonexistent/projects")
    }

    /// An `up` customer whose every path lives under `root`
    pub fn fs_vars(root: &Path) -> Vars {
        let path = |p: &str| root.join(p).to_string_lossy().to_string();
        up_vars()
            .with("project_path", path("projects"))
            .with("log_path", path("log"))
            .with("info_path", path("info"))
            .with("backup_path", path("backup"))
            .with("playbook_dir", path("resources"))
    }
}
