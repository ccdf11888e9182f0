//! Local filesystem manager
//!
//! Directory and file operations used by the scaffolding, config and restore
//! phases. Every operation reports whether it changed anything so reruns stay
//! quiet, and `force` clears read-only bits before destructive work.

use chrono::Utc;
use deckhand_core::{DeployError, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of writing or copying a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub changed: bool,
    /// Copy of the previous content, when a backup was requested and taken
    pub backup: Option<PathBuf>,
}

/// Filesystem operations on the local host
#[derive(Debug, Clone, Default)]
pub struct FileManager;

impl FileManager {
    pub fn new() -> Self {
        Self
    }

    /// Ensures a directory exists with the given mode
    ///
    /// Parents are created as needed. An existing directory is only touched when
    /// its mode differs. With `force`, a file occupying the path is replaced.
    ///
    /// # Returns
    /// true if the directory was created or its mode changed
    pub fn create_directory(&self, path: &Path, mode: u32, force: bool) -> Result<bool> {
        if path.exists() && !path.is_dir() {
            if !force {
                return Err(DeployError::Io(format!(
                    "{} exists and is not a directory",
                    path.display()
                )));
            }
            warn!("Replacing non-directory at {}", path.display());
            self.delete_file(path, true)?;
        }

        if path.is_dir() {
            return self.set_mode(path, mode);
        }

        fs::create_dir_all(path)
            .map_err(|e| DeployError::io(format!("Failed to create {}", path.display()), e))?;
        self.set_mode(path, mode)?;
        info!("Created directory {}", path.display());
        Ok(true)
    }

    /// Removes a directory
    ///
    /// Without `force` only an empty directory is removed. With `force` the whole
    /// tree goes, read-only entries included. A missing directory is not an error.
    pub fn remove_directory(&self, path: &Path, force: bool) -> Result<bool> {
        if !path.exists() {
            debug!("Directory {} already absent", path.display());
            return Ok(false);
        }

        if force {
            remove_tree(path)?;
        } else {
            fs::remove_dir(path)
                .map_err(|e| DeployError::io(format!("Failed to remove {}", path.display()), e))?;
        }
        info!("Removed directory {}", path.display());
        Ok(true)
    }

    /// Lists a directory, sorted
    pub fn list_directory(&self, path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
        if !path.is_dir() {
            return Err(DeployError::NotFound(format!("directory {}", path.display())));
        }

        let mut entries = Vec::new();
        collect_entries(path, recursive, &mut entries)?;
        entries.sort();
        Ok(entries)
    }

    /// Reads a file as UTF-8
    pub fn read_file(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeployError::NotFound(format!("file {}", path.display()))
            } else {
                DeployError::io(format!("Failed to read {}", path.display()), e)
            }
        })
    }

    /// Writes a file when its content or mode differs
    ///
    /// # Arguments
    /// * `path` - Destination; parent directories are created
    /// * `content` - Full file content
    /// * `mode` - Permission bits applied after writing
    /// * `backup` - Keep a timestamped copy of the previous content
    pub fn write_file(&self, path: &Path, content: &str, mode: u32, backup: bool) -> Result<WriteReport> {
        let existing = fs::read(path).ok();

        if existing.as_deref() == Some(content.as_bytes()) {
            let mode_changed = self.set_mode(path, mode)?;
            return Ok(WriteReport {
                changed: mode_changed,
                backup: None,
            });
        }

        self.ensure_parent(path)?;

        let backup_path = if backup && existing.is_some() {
            Some(self.backup_file(path)?)
        } else {
            None
        };

        fs::write(path, content)
            .map_err(|e| DeployError::io(format!("Failed to write {}", path.display()), e))?;
        self.set_mode(path, mode)?;
        info!("Wrote {}", path.display());

        Ok(WriteReport {
            changed: true,
            backup: backup_path,
        })
    }

    /// Copies a file when the destination differs
    pub fn copy_file(&self, src: &Path, dest: &Path, mode: u32, backup: bool) -> Result<WriteReport> {
        let content = fs::read(src).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeployError::NotFound(format!("file {}", src.display()))
            } else {
                DeployError::io(format!("Failed to read {}", src.display()), e)
            }
        })?;

        let existing = fs::read(dest).ok();
        if existing.as_deref() == Some(content.as_slice()) {
            let mode_changed = self.set_mode(dest, mode)?;
            return Ok(WriteReport {
                changed: mode_changed,
                backup: None,
            });
        }

        self.ensure_parent(dest)?;

        let backup_path = if backup && existing.is_some() {
            Some(self.backup_file(dest)?)
        } else {
            None
        };

        fs::write(dest, &content)
            .map_err(|e| DeployError::io(format!("Failed to write {}", dest.display()), e))?;
        self.set_mode(dest, mode)?;
        info!("Copied {} to {}", src.display(), dest.display());

        Ok(WriteReport {
            changed: true,
            backup: backup_path,
        })
    }

    /// Deletes a file; `force` clears the read-only bit first
    pub fn delete_file(&self, path: &Path, force: bool) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }

        if force {
            make_writable(path)?;
        }
        fs::remove_file(path)
            .map_err(|e| DeployError::io(format!("Failed to delete {}", path.display()), e))?;
        info!("Deleted {}", path.display());
        Ok(true)
    }

    /// Applies permission bits
    ///
    /// # Returns
    /// true if the mode was different
    pub fn set_mode(&self, path: &Path, mode: u32) -> Result<bool> {
        let metadata = fs::metadata(path)
            .map_err(|e| DeployError::io(format!("Failed to stat {}", path.display()), e))?;

        if metadata.permissions().mode() & 0o7777 == mode {
            return Ok(false);
        }

        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| DeployError::io(format!("Failed to chmod {}", path.display()), e))?;
        debug!("Set mode {:o} on {}", mode, path.display());
        Ok(true)
    }

    /// True when any execute bit is set
    pub fn is_executable(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    DeployError::io(format!("Failed to create {}", parent.display()), e)
                })?;
            }
        }
        Ok(())
    }

    fn backup_file(&self, path: &Path) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}~", stamp));
        let backup = PathBuf::from(name);

        fs::copy(path, &backup)
            .map_err(|e| DeployError::io(format!("Failed to back up {}", path.display()), e))?;
        debug!("Backup created: {}", backup.display());
        Ok(backup)
    }
}

/// Removes a tree, clearing read-only bits that would block deletion
pub fn remove_tree(path: &Path) -> Result<()> {
    make_writable_recursive(path)?;
    fs::remove_dir_all(path)
        .map_err(|e| DeployError::io(format!("Failed to remove {}", path.display()), e))
}

fn make_writable(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|e| DeployError::io(format!("Failed to stat {}", path.display()), e))?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }

    let mode = metadata.permissions().mode();
    let wanted = if metadata.is_dir() { mode | 0o700 } else { mode | 0o200 };
    if wanted != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(wanted))
            .map_err(|e| DeployError::io(format!("Failed to chmod {}", path.display()), e))?;
    }
    Ok(())
}

fn make_writable_recursive(path: &Path) -> Result<()> {
    make_writable(path)?;
    if path.is_dir() && !path.is_symlink() {
        let entries = fs::read_dir(path)
            .map_err(|e| DeployError::io(format!("Failed to read {}", path.display()), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| DeployError::io(format!("Failed to read {}", path.display()), e))?;
            make_writable_recursive(&entry.path())?;
        }
    }
    Ok(())
}

fn collect_entries(path: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(path)
        .map_err(|e| DeployError::io(format!("Failed to read {}", path.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| DeployError::io(format!("Failed to read {}", path.display()), e))?;
        let entry_path = entry.path();
        let is_dir = entry_path.is_dir() && !entry_path.is_symlink();
        out.push(entry_path.clone());
        if recursive && is_dir {
            collect_entries(&entry_path, true, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn test_create_directory_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("srv/acme01/gateway");
        let files = FileManager::new();

        assert!(files.create_directory(&dir, 0o755, false).unwrap());
        assert!(!files.create_directory(&dir, 0o755, false).unwrap());
        assert_eq!(mode_of(&dir), 0o755);

        assert!(files.create_directory(&dir, 0o700, false).unwrap());
        assert_eq!(mode_of(&dir), 0o700);
    }

    #[test]
    fn test_create_directory_over_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("docker");
        fs::write(&path, "not a dir").unwrap();
        let files = FileManager::new();

        assert!(files.create_directory(&path, 0o755, false).is_err());
        assert!(files.create_directory(&path, 0o755, true).unwrap());
        assert!(path.is_dir());
    }

    #[test]
    fn test_write_file_reports_change_only_on_new_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("portal/.env.local");
        let files = FileManager::new();

        let first = files.write_file(&path, "APP_ENV=prod\n", 0o644, true).unwrap();
        assert!(first.changed);
        assert!(first.backup.is_none());

        let second = files.write_file(&path, "APP_ENV=prod\n", 0o644, true).unwrap();
        assert!(!second.changed);

        let third = files.write_file(&path, "APP_ENV=dev\n", 0o644, true).unwrap();
        assert!(third.changed);
        let backup = third.backup.unwrap();
        assert_eq!(fs::read_to_string(backup).unwrap(), "APP_ENV=prod\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "APP_ENV=dev\n");
    }

    #[test]
    fn test_copy_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("acme01_gateway.sql");
        let dest = tmp.path().join("gateway/docker/init/install.sql");
        fs::write(&src, "CREATE TABLE t (id INT);").unwrap();
        let files = FileManager::new();

        assert!(files.copy_file(&src, &dest, 0o644, false).unwrap().changed);
        assert!(!files.copy_file(&src, &dest, 0o644, false).unwrap().changed);

        let missing = files.copy_file(&tmp.path().join("nope.sql"), &dest, 0o644, false);
        assert!(missing.unwrap_err().is_not_found());
    }

    #[test]
    fn test_force_remove_read_only_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let nested = root.join(".git/objects");
        fs::create_dir_all(&nested).unwrap();
        let locked = nested.join("pack");
        fs::write(&locked, "data").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o444)).unwrap();
        fs::set_permissions(&nested, fs::Permissions::from_mode(0o555)).unwrap();

        let files = FileManager::new();
        assert!(files.remove_directory(&root, true).unwrap());
        assert!(!root.exists());
        assert!(!files.remove_directory(&root, true).unwrap());
    }

    #[test]
    fn test_list_directory_recursive() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("a/b/c.txt"), "").unwrap();
        let files = FileManager::new();

        assert_eq!(files.list_directory(tmp.path(), false).unwrap().len(), 1);
        assert_eq!(files.list_directory(tmp.path(), true).unwrap().len(), 3);
    }
}
