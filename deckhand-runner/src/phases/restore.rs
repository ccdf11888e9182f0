//! Phase 08: seed databases and uploads from the resources directory
//!
//! Looks under `<playbook_dir>/sql` for per-host artifacts:
//! - `<host>_<svc>.sql` dumps, copied to `<svc>/docker/init/install.sql`
//! - `<host>_<svc>_uploads.zip` archives, extracted into the service tree
//! - `<host>_<svc>.env` files, copied to `<svc>/.env` with mode 0600
//!
//! A missing artifact is a skipped sub-step, never a failure.

use async_trait::async_trait;
use deckhand_core::{Outcome, Steps, Vars};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::phases::customer_root;
use crate::process::CommandSpec;
use crate::services::Services;
use crate::task::Phase;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(600);

/// Archive formats the phase can unpack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    fn command(self, archive: &Path, dest: &Path, exclude: &[&str]) -> CommandSpec {
        let archive = archive.to_string_lossy().to_string();
        let dest = dest.to_string_lossy().to_string();
        match self {
            Self::Zip => {
                let mut spec = CommandSpec::new("unzip").args(["-o", "-q", archive.as_str(), "-d", dest.as_str()]);
                if !exclude.is_empty() {
                    spec = spec.arg("-x").args(exclude.iter().map(|e| format!("*{}*", e)));
                }
                spec
            }
            Self::Tar | Self::TarGz => {
                let flags = if self == Self::TarGz { "-xzf" } else { "-xf" };
                CommandSpec::new("tar")
                    .args([flags, archive.as_str(), "-C", dest.as_str()])
                    .args(exclude.iter().map(|e| format!("--exclude={}", e)))
            }
        }
        .timeout(EXTRACT_TIMEOUT)
    }
}

/// Copies SQL dumps, env files and uploads into the customer tree
pub struct SqlAndUploadsPhase;

struct Restore<'a> {
    services: &'a Services,
    sql_dir: PathBuf,
    root: PathBuf,
    host: String,
}

impl Restore<'_> {
    fn source(&self, name: &str) -> Option<PathBuf> {
        let path = self.sql_dir.join(name);
        path.is_file().then_some(path)
    }

    fn copy(&self, candidates: &[String], dest: &Path, mode: u32) -> Outcome {
        let Some(src) = candidates.iter().find_map(|name| self.source(name)) else {
            debug!("No source for {} (tried {})", dest.display(), candidates.join(", "));
            return Outcome::skipped(format!("No source file found ({})", candidates.join(", ")));
        };

        match self.services.files.copy_file(&src, dest, mode, false) {
            Ok(report) => Outcome::done(
                report.changed,
                format!("Copied {} to {}", src.display(), dest.display()),
            )
            .with("src", src.to_string_lossy())
            .with("dest", dest.to_string_lossy()),
            Err(e) => Outcome::failed(e),
        }
    }

    async fn extract(&self, name: &str, dest: &Path, exclude: &[&str]) -> Outcome {
        let Some(archive) = self.source(name) else {
            return Outcome::skipped(format!("No archive found ({})", name));
        };
        let Some(kind) = ArchiveKind::detect(&archive) else {
            return Outcome::skipped(format!("Unsupported archive format: {}", archive.display()));
        };

        if let Err(e) = self.services.files.create_directory(dest, 0o755, false) {
            return Outcome::failed(e);
        }

        info!("Extracting {} into {}", archive.display(), dest.display());
        match self.services.runner.run_checked(kind.command(&archive, dest, exclude)).await {
            Ok(_) => Outcome::changed(format!("Extracted {} to {}", archive.display(), dest.display()))
                .with("archive", archive.to_string_lossy())
                .with("dest", dest.to_string_lossy()),
            Err(e) => Outcome::failed(e),
        }
    }

    fn sql(&self, service: &str, candidates: &[String]) -> Outcome {
        let dest = self.root.join(service).join("docker/init/install.sql");
        self.copy(candidates, &dest, 0o644)
    }

    fn env(&self, service: &str) -> Outcome {
        let name = format!("{}_{}.env", self.host, service);
        self.copy(&[name], &self.root.join(service).join(".env"), 0o600)
    }

    async fn run(&self) -> Steps {
        let host = &self.host;
        let mut steps = Steps::new();

        steps.record(
            "gateway_sql_copy",
            self.sql(
                "gateway",
                &[format!("{}_gateway.sql", host), "default_gateway.sql".to_string()],
            ),
        );
        steps.record(
            "gateway_uploads_extract",
            self.extract(
                &format!("{}_gateway_uploads.zip", host),
                &self.root.join("gateway/admin/uploads"),
                &["index.html"],
            )
            .await,
        );

        steps.record("portal_sql_copy", self.sql("portal", &[format!("{}_portal.sql", host)]));

        steps.record(
            "frontend_extract",
            self.extract(
                &format!("{}_frontend.zip", host),
                &self.root.join("portal-frontend"),
                &["node_modules", ".git"],
            )
            .await,
        );

        for service in ["lms", "file"] {
            steps.record(
                format!("{}_sql_copy", service),
                self.sql(service, &[format!("{}_{}.sql", host, service)]),
            );
            steps.record(
                format!("{}_uploads_extract", service),
                self.extract(
                    &format!("{}_{}_uploads.zip", host, service),
                    &self.root.join(service).join("storage/app"),
                    &[],
                )
                .await,
            );
            steps.record(format!("{}_env_copy", service), self.env(service));
        }

        steps
    }
}

#[async_trait]
impl Phase for SqlAndUploadsPhase {
    fn name(&self) -> &'static str {
        "task_08_sql_and_uploads"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["sql", "uploads", "restore"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "project_path", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let sql_dir = vars
            .get_str("playbook_dir")
            .map(|dir| PathBuf::from(dir).join("sql"))
            .unwrap_or_else(|| services.config.sql_dir());

        let restore = Restore {
            services,
            sql_dir,
            root: customer_root(vars),
            host: vars.str_or("inventory_hostname", ""),
        };

        let steps = restore.run().await;
        steps
            .finish("SQL and uploads restoration completed")
            .with("inventory_hostname", &restore.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests_support::{fs_services, fs_vars, write_resource};
    use crate::process::CommandOutput;
    use crate::task::execute_phase;
    use crate::testing::FakeRunner;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_archive_commands() {
        let zip = ArchiveKind::detect(Path::new("/sql/acme01_frontend.zip")).unwrap();
        let spec = zip.command(Path::new("/sql/acme01_frontend.zip"), Path::new("/p/portal-frontend"), &["node_modules", ".git"]);
        assert_eq!(
            spec.display(),
            "unzip -o -q /sql/acme01_frontend.zip -d /p/portal-frontend -x *node_modules* *.git*"
        );

        let tgz = ArchiveKind::detect(Path::new("uploads.tgz")).unwrap();
        assert_eq!(tgz, ArchiveKind::TarGz);
        assert_eq!(
            tgz.command(Path::new("uploads.tgz"), Path::new("/d"), &["index.html"]).display(),
            "tar -xzf uploads.tgz -C /d --exclude=index.html"
        );
        assert!(ArchiveKind::detect(Path::new("dump.rar")).is_none());
    }

    #[tokio::test]
    async fn test_nothing_to_restore_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let result = execute_phase(&SqlAndUploadsPhase, &fs_vars(tmp.path()), &fs_services(&runner, tmp.path())).await;
        assert!(result.success());
        assert!(result.outcome.is_skipped());
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_default_gateway_dump_and_env_mode() {
        let tmp = TempDir::new().unwrap();
        write_resource(tmp.path(), "sql/default_gateway.sql", "CREATE TABLE t (id INT);\n");
        write_resource(tmp.path(), "sql/acme01_lms.env", "APP_KEY=base64:xyz\n");
        write_resource(tmp.path(), "sql/acme01_file_uploads.zip", "PK");
        let runner = FakeRunner::new();
        runner.on("unzip", CommandOutput::ok(""));
        let services = fs_services(&runner, tmp.path());

        let result = execute_phase(&SqlAndUploadsPhase, &fs_vars(tmp.path()), &services).await;
        assert!(result.success(), "{:?}", result.outcome);
        assert!(result.outcome.is_changed());

        let root = tmp.path().join("projects/acme01");
        assert_eq!(
            std::fs::read_to_string(root.join("gateway/docker/init/install.sql")).unwrap(),
            "CREATE TABLE t (id INT);\n"
        );
        let env_mode = std::fs::metadata(root.join("lms/.env")).unwrap().permissions().mode();
        assert_eq!(env_mode & 0o777, 0o600);
        assert_eq!(runner.count_matching("unzip -o -q"), 1);
        assert!(root.join("file/storage/app").is_dir());
    }

    #[tokio::test]
    async fn test_failed_extraction_fails_phase() {
        let tmp = TempDir::new().unwrap();
        write_resource(tmp.path(), "sql/acme01_gateway_uploads.zip", "PK");
        let runner = FakeRunner::new();
        runner.on("unzip", CommandOutput::failed(9, "End-of-central-directory signature not found"));

        let result = execute_phase(&SqlAndUploadsPhase, &fs_vars(tmp.path()), &fs_services(&runner, tmp.path())).await;
        assert!(!result.success());
        assert_eq!(
            result.outcome.detail("failed_steps").unwrap(),
            &serde_json::json!(["gateway_uploads_extract"])
        );
    }
}
