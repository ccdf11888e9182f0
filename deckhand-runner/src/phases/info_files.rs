//! Phase 14: volume and database inventories
//!
//! Writes `<info_path>/volumes/<host>.txt` and `<info_path>/databases/<host>.txt`.
//! The backup scripts read both files to know what to archive.

use async_trait::async_trait;
use deckhand_core::{Outcome, Steps, Vars};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::services::Services;
use crate::task::Phase;

const INFO_MODE: u32 = 0o644;

const VOLUMES: &str = "# Gateway (CodeIgniter)
gateway/admin/uploads
gateway/admin/captcha_images
gateway/admin

portal
portal-frontend

lms/storage/app/public
lms/storage/app/private
lms/storage/logs
lms/.env

file/storage/app/public
file/storage/app/private
file/storage/logs
file/.env
";

/// `(service, default password)` for each database line
const DATABASES: [(&str, &str); 4] = [
    ("portal", "password"),
    ("gateway", "password"),
    ("lms", "1234"),
    ("file", "1234"),
];

fn mysql_vars(service: &str) -> [String; 3] {
    [
        format!("{}_mysql_db_name", service),
        format!("{}_mysql_user", service),
        format!("{}_mysql_password", service),
    ]
}

/// Renders the database inventory, falling back to defaults for unset credentials
pub fn databases_content(vars: &Vars) -> String {
    let host = vars.str_or("inventory_hostname", "");
    let containers = vars.str_or("customer_containers", &host);

    let lines: Vec<String> = DATABASES
        .iter()
        .map(|(service, default_password)| {
            let [db, user, password] = mysql_vars(service);
            format!(
                "mysql,{},{},{},{}-{}-db",
                vars.str_or(&db, &format!("{}_db", service)),
                vars.str_or(&user, &format!("{}_user", service)),
                vars.str_or(&password, default_password),
                containers,
                service
            )
        })
        .collect();

    format!("# Portal (Symfony)\n{}\n", lines.join("\n\n"))
}

pub struct InfoFilesPhase;

#[async_trait]
impl Phase for InfoFilesPhase {
    fn name(&self) -> &'static str {
        "task_14_write_info_files"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["info", "backup"]
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["customer_state", "info_path", "inventory_hostname"]
    }

    async fn run(&self, vars: &Vars, services: &Services) -> Outcome {
        let missing: Vec<String> = DATABASES
            .iter()
            .flat_map(|(service, _)| mysql_vars(service))
            .filter(|key| !vars.contains(key))
            .collect();
        if !missing.is_empty() {
            warn!("Missing variable for info files: {}", missing.join(", "));
        }

        let info_path = PathBuf::from(vars.str_or("info_path", "/info"));
        let file_name = format!("{}.txt", vars.str_or("inventory_hostname", ""));
        let files = [
            ("volumes", info_path.join("volumes").join(&file_name), VOLUMES.to_string()),
            ("databases", info_path.join("databases").join(&file_name), databases_content(vars)),
        ];

        let mut steps = Steps::new();
        for (name, path, content) in files {
            let outcome = match services.files.write_file(&path, &content, INFO_MODE, false) {
                Ok(report) => {
                    if report.changed {
                        info!("Wrote {} info file: {}", name, path.display());
                    }
                    Outcome::done(report.changed, format!("{} info file at {}", name, path.display()))
                        .with("path", path.to_string_lossy())
                }
                Err(e) => Outcome::failed(e),
            };
            steps.record(name, outcome);
        }

        let outcome = steps.finish("Info files written");
        if missing.is_empty() {
            outcome
        } else {
            outcome.with("warnings", vec![format!("Missing variable for info files: {}", missing.join(", "))])
        }
    }
}
