//! Git working copy synchronization
//!
//! Keeps a service checkout at the requested ref. A missing or corrupt
//! checkout is removed and cloned fresh; an existing one is fetched and
//! checked out, falling back to pulling the current branch when the ref is
//! neither a branch nor a tag.

use deckhand_core::{DeployError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::manager::files::remove_tree;
use crate::process::{CommandRunner, CommandSpec};

const CLONE_TIMEOUT: Duration = Duration::from_secs(600);
const FETCH_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_BRANCH: &str = "main";

/// What a sync did to the working copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GitAction {
    Cloned,
    Updated,
    AlreadyUpToDate,
    Pulled,
}

/// Result of [`GitManager::sync`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitSync {
    pub action: GitAction,
    /// Short hash before the sync; None for a fresh clone
    pub before: Option<String>,
    /// Short hash after the sync
    pub after: String,
    /// Ref that ended up checked out
    pub version: String,
}

impl GitSync {
    pub fn changed(&self) -> bool {
        match self.action {
            GitAction::Cloned => true,
            _ => self.before.as_deref() != Some(self.after.as_str()),
        }
    }
}

/// Git CLI wrapper
pub struct GitManager {
    runner: Arc<dyn CommandRunner>,
    key_path: Option<PathBuf>,
    strict_host_keys: bool,
}

impl GitManager {
    /// Creates a new git manager
    ///
    /// # Arguments
    /// * `runner` - Executes the git CLI
    /// * `key_path` - SSH identity used for clone and fetch, when present
    /// * `strict_host_keys` - Verify the remote host key
    pub fn new(runner: Arc<dyn CommandRunner>, key_path: Option<PathBuf>, strict_host_keys: bool) -> Self {
        Self {
            runner,
            key_path,
            strict_host_keys,
        }
    }

    fn git(&self) -> CommandSpec {
        let mut spec = CommandSpec::new("git");
        if let Some(key) = &self.key_path {
            let checking = if self.strict_host_keys { "yes" } else { "no" };
            spec = spec.env(
                "GIT_SSH_COMMAND",
                format!("ssh -i {} -o StrictHostKeyChecking={}", key.display(), checking),
            );
        }
        spec
    }

    fn git_in(&self, dir: &Path) -> CommandSpec {
        self.git().arg("-C").arg(dir.to_string_lossy())
    }

    /// Brings `dest` to `version` of `repo`
    ///
    /// # Arguments
    /// * `repo` - Remote URL
    /// * `dest` - Working copy path
    /// * `version` - Branch or tag
    /// * `force` - Discard local modifications on checkout
    ///
    /// # Returns
    /// The action taken with commit hashes before and after
    pub async fn sync(&self, repo: &str, dest: &Path, version: &str, force: bool) -> Result<GitSync> {
        match self.head(dest).await {
            Some(before) => self.update(dest, version, before, force).await,
            None => {
                if dest.exists() {
                    warn!("Removing broken/incomplete repo: {}", dest.display());
                    remove_tree(dest)?;
                }
                self.clone_repo(repo, dest, version, force).await
            }
        }
    }

    /// Short hash of HEAD, or None when `dest` is not a usable checkout
    pub async fn head(&self, dest: &Path) -> Option<String> {
        if !dest.join(".git").is_dir() {
            return None;
        }
        let spec = self.git_in(dest).args(["rev-parse", "--short=7", "HEAD"]);
        match self.runner.run(spec).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                Some(output.stdout.trim().to_string())
            }
            _ => None,
        }
    }

    async fn clone_repo(&self, repo: &str, dest: &Path, version: &str, force: bool) -> Result<GitSync> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DeployError::io(format!("Failed to create {}", parent.display()), e))?;
        }

        info!("Cloning {} into {}", repo, dest.display());
        let mut spec = self.git().arg("clone");
        if version != DEFAULT_BRANCH {
            spec = spec.args(["--branch", version]);
        }
        spec = spec.arg(repo).arg(dest.to_string_lossy()).timeout(CLONE_TIMEOUT);
        self.runner.run_checked(spec).await?;

        if version != DEFAULT_BRANCH && !self.checkout(dest, version, force).await? {
            let tag_ref = format!("tags/{}", version);
            if !self.checkout(dest, &tag_ref, force).await? {
                warn!("Version {} not found, using default branch", version);
            }
        }

        let after = self.require_head(dest).await?;
        Ok(GitSync {
            action: GitAction::Cloned,
            before: None,
            after,
            version: version.to_string(),
        })
    }

    async fn update(&self, dest: &Path, version: &str, before: String, force: bool) -> Result<GitSync> {
        self.runner
            .run_checked(self.git_in(dest).args(["fetch", "origin"]).timeout(FETCH_TIMEOUT))
            .await?;

        if self.checkout(dest, version, force).await? {
            let after = self.require_head(dest).await?;
            let action = if after != before {
                GitAction::Updated
            } else {
                GitAction::AlreadyUpToDate
            };
            info!("{} now at {} ({})", dest.display(), version, after);
            return Ok(GitSync {
                action,
                before: Some(before),
                after,
                version: version.to_string(),
            });
        }

        let current = self.current_branch(dest).await?;
        warn!("Cannot checkout {}, pulling current branch {}", version, current);
        self.runner
            .run_checked(self.git_in(dest).arg("pull").timeout(FETCH_TIMEOUT))
            .await?;

        let after = self.require_head(dest).await?;
        let action = if after != before {
            GitAction::Pulled
        } else {
            GitAction::AlreadyUpToDate
        };
        Ok(GitSync {
            action,
            before: Some(before),
            after,
            version: current,
        })
    }

    /// Tries to check out a ref
    ///
    /// # Returns
    /// false when git refused the ref
    async fn checkout(&self, dest: &Path, reference: &str, force: bool) -> Result<bool> {
        let mut spec = self.git_in(dest).arg("checkout");
        if force {
            spec = spec.arg("-f");
        }
        let output = self.runner.run(spec.arg(reference)).await?;
        if !output.success() {
            debug!("git checkout {} failed: {}", reference, output.stderr.trim());
        }
        Ok(output.success())
    }

    async fn current_branch(&self, dest: &Path) -> Result<String> {
        let output = self
            .runner
            .run_checked(self.git_in(dest).args(["rev-parse", "--abbrev-ref", "HEAD"]))
            .await?;
        let branch = output.stdout.trim();
        Ok(if branch == "HEAD" {
            "detached".to_string()
        } else {
            branch.to_string()
        })
    }

    async fn require_head(&self, dest: &Path) -> Result<String> {
        self.head(dest)
            .await
            .ok_or_else(|| DeployError::NotFound(format!("git HEAD in {}", dest.display())))
    }
}
