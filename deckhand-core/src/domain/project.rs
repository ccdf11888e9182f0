//! Project catalogue
//!
//! The five services every customer runs. The catalogue is static; a
//! [`ProjectDescriptor`] is the per-customer resolution of one entry and is
//! recomputed on every run.

use serde::{Deserialize, Serialize};

use crate::vars::Vars;

/// Version used when neither a tag nor a branch is configured
pub const DEFAULT_VERSION: &str = "main";

/// Static catalogue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectSpec {
    pub name: &'static str,
    pub folder: &'static str,
    pub repo: &'static str,
}

/// Service catalogue in deployment order
pub const CATALOGUE: [ProjectSpec; 5] = [
    ProjectSpec {
        name: "gateway",
        folder: "gateway",
        repo: "git@github.com:nasserman/calibri.git",
    },
    ProjectSpec {
        name: "portal",
        folder: "portal",
        repo: "git@github.com:nasserman/calibri-portal.git",
    },
    ProjectSpec {
        name: "portal-frontend",
        folder: "portal-frontend",
        repo: "git@github.com:nasserman/calibri-portal-frontend.git",
    },
    ProjectSpec {
        name: "lms",
        folder: "lms",
        repo: "git@github.com:nasserman/calibri-lms",
    },
    ProjectSpec {
        name: "file",
        folder: "file",
        repo: "git@github.com:nasserman/calibri-file-storage",
    },
];

impl ProjectSpec {
    /// Name fragment used in variable names (`portal-frontend` -> `portal_frontend`)
    pub fn var_stem(&self) -> String {
        self.name.replace('-', "_")
    }

    pub fn branch_var(&self) -> String {
        format!("customer_{}_git_branches", self.var_stem())
    }

    pub fn tag_var(&self) -> String {
        format!("customer_{}_git_tags", self.var_stem())
    }

    pub fn update_var(&self) -> String {
        format!("customer_{}_update", self.var_stem())
    }

    /// Resolves this entry against customer variables
    ///
    /// The effective git ref is the tag, else the branch, else `main`.
    pub fn resolve(&self, vars: &Vars) -> ProjectDescriptor {
        let branch_var = self.branch_var();
        let tag_var = self.tag_var();
        let update_var = self.update_var();

        let version = vars
            .get_str(&tag_var)
            .or_else(|| vars.get_str(&branch_var))
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());

        ProjectDescriptor {
            name: self.name.to_string(),
            folder: self.folder.to_string(),
            repo: self.repo.to_string(),
            update: vars.get_bool(&update_var),
            branch_var,
            tag_var,
            update_var,
            version,
            force: true,
        }
    }
}

/// A catalogue entry resolved for one customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub name: String,
    pub folder: String,
    pub repo: String,
    pub branch_var: String,
    pub tag_var: String,
    pub update_var: String,
    /// Effective git ref
    pub version: String,
    /// Whether this service is updated on this pass
    pub update: bool,
    /// Discard local changes when syncing
    pub force: bool,
}

impl ProjectDescriptor {
    /// File name of the compose template for this project
    pub fn compose_template(&self) -> String {
        format!("compose-{}.yml.j2", self.folder)
    }
}

/// Resolves the whole catalogue for a customer
pub fn resolve_projects(vars: &Vars) -> Vec<ProjectDescriptor> {
    CATALOGUE.iter().map(|spec| spec.resolve(vars)).collect()
}

/// Looks up a catalogue entry by service name
pub fn find_spec(name: &str) -> Option<&'static ProjectSpec> {
    CATALOGUE.iter().find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_names() {
        let spec = find_spec("portal-frontend").unwrap();
        assert_eq!(spec.branch_var(), "customer_portal_frontend_git_branches");
        assert_eq!(spec.tag_var(), "customer_portal_frontend_git_tags");
        assert_eq!(spec.update_var(), "customer_portal_frontend_update");
    }

    #[test]
    fn test_version_precedence() {
        let vars = Vars::new()
            .with("customer_gateway_git_tags", "v2.1.0")
            .with("customer_gateway_git_branches", "develop")
            .with("customer_portal_git_branches", "release")
            .with("customer_gateway_update", "yes");

        let projects = resolve_projects(&vars);
        assert_eq!(projects.len(), 5);
        assert_eq!(projects[0].version, "v2.1.0");
        assert!(projects[0].update);
        assert_eq!(projects[1].version, "release");
        assert!(!projects[1].update);
        assert_eq!(projects[2].version, DEFAULT_VERSION);
    }

    #[test]
    fn test_compose_template_name() {
        let project = find_spec("lms").unwrap().resolve(&Vars::new());
        assert_eq!(project.compose_template(), "compose-lms.yml.j2");
    }
}
