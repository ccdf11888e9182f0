//! Phases 02, 04 and 05: directory scaffolding
//!
//! Creates the per-customer tree before anything is cloned or rendered:
//! - 02: the customer base directory plus the global backup/log/info roots
//! - 04: one directory per project and the gateway admin paths
//! - 05: the gateway `docker/init` directory that receives the SQL dump

use async_trait::async_trait;
use deckhand_core::domain::project::CATALOGUE;
use deckhand_core::{Outcome, Steps, Vars};
use std::path::{Path, PathBuf};

use crate::phases::{customer_root, ensure_dir};
use crate::services::Services;
use crate::task::Phase;

const DIR_MODE: u32 = 0o755;

const GATEWAY_PATHS: [&str; 3] = ["admin/application/config", "admin/uploads", "admin/captcha_images"];

fn ensure_all(services: &Services, dirs: &[PathBuf], message: &str) -> Outcome {
    let mut steps = Steps::new();
    let mut created = 0;
    for dir in dirs {
        let outcome = ensure_dir(services, dir, DIR_MODE);
        if outcome.is_changed() {
            created += 1;
        }
        steps.record(dir.to_string_lossy(), outcome);
    }
    steps
        .finish(message)
        .with("directories_created", created)
        .with("directories_total", dirs.len())
}

/// Phase 02
pub struct CreateDirsPhase;

impl CreateDirsPhase {
    fn directories(vars: &Vars) -> Vec<PathBuf> {
        let host = vars.str_or("inventory_hostname", "");
        let backup = PathBuf::from(vars.str_or("backup_path", "/backup"));
        let log = PathBuf::from(vars.str_or("log_path", "/var/log"));
        let info = PathBuf::from(vars.str_or("info_path", "/info"));

        vec![
            customer_root(vars),
            backup.join(&host),
            log.join("backup"),
            log.join("test-reports").join(&host),
            info.join("volumes"),
            info.join("databases"),
        ]
    }
}

#[async_trait]
impl Phase for CreateDirsPhase {
    fn name(&self) -> &'static str {
        "task_02_create_dirs"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["dirs", "setup"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "project_path", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        ensure_all(services, &Self::directories(vars), "Base and global directories ensured")
    }
}

/// Phase 04
pub struct ProjectDirsPhase;

impl ProjectDirsPhase {
    fn directories(root: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = CATALOGUE.iter().map(|spec| root.join(spec.folder)).collect();
        let gateway = root.join("gateway");
        dirs.extend(GATEWAY_PATHS.iter().map(|p| gateway.join(p)));
        dirs
    }
}

#[async_trait]
impl Phase for ProjectDirsPhase {
    fn name(&self) -> &'static str {
        "task_04_ensure_project_dirs"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["dirs", "setup"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "project_path", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let dirs = Self::directories(&customer_root(vars));
        ensure_all(services, &dirs, "Project directories ensured")
    }
}

/// Phase 05
pub struct GatewayInitPhase;

#[async_trait]
impl Phase for GatewayInitPhase {
    fn name(&self) -> &'static str {
        "task_05_ensure_gateway_docker_init"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["dirs", "gateway"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "project_path", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let init_dir = customer_root(vars).join("gateway/docker/init");
        let outcome = ensure_dir(services, &init_dir, DIR_MODE);
        if !outcome.is_success() {
            return outcome;
        }

        let message = if outcome.is_changed() {
            format!("Directory created: {}", init_dir.display())
        } else {
            format!("Directory already exists: {}", init_dir.display())
        };
        Outcome::done(outcome.is_changed(), message).with("path", init_dir.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests_support::{fs_vars, services};
    use crate::task::execute_phase;
    use crate::testing::FakeRunner;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_dirs_idempotent() {
        let tmp = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let services = services(&runner);
        let vars = fs_vars(tmp.path());

        let first = execute_phase(&CreateDirsPhase, &vars, &services).await;
        assert!(first.success());
        assert!(first.outcome.is_changed());
        assert!(tmp.path().join("projects/acme01").is_dir());
        assert!(tmp.path().join("log/test-reports/acme01").is_dir());
        assert!(tmp.path().join("info/databases").is_dir());

        let second = execute_phase(&CreateDirsPhase, &vars, &services).await;
        assert!(second.success());
        assert!(!second.outcome.is_changed());
    }

    #[tokio::test]
    async fn test_project_dirs_include_gateway_admin() {
        let tmp = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let vars = fs_vars(tmp.path());

        let result = execute_phase(&ProjectDirsPhase, &vars, &services(&runner)).await;
        assert!(result.success());
        let root = tmp.path().join("projects/acme01");
        assert!(root.join("portal-frontend").is_dir());
        assert!(root.join("gateway/admin/captcha_images").is_dir());
        assert_eq!(result.outcome.detail("directories_total").unwrap(), 8);
    }

    #[tokio::test]
    async fn test_gateway_init_down_state_skipped() {
        let tmp = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let vars = fs_vars(tmp.path()).with("customer_state", "down");

        let result = execute_phase(&GatewayInitPhase, &vars, &services(&runner)).await;
        assert!(result.outcome.is_skipped());
        assert!(!tmp.path().join("projects/acme01/gateway/docker/init").exists());
    }
}
