//! Filesystem layout of controller and session state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::naming::workspace_path;

/// Name of the state directory, both in the controller and inside each workspace.
pub const STATE_DIR_NAME: &str = ".trench";

/// `path` as UTF-8, the form persisted in session records.
pub fn utf8_path(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path {} is not valid UTF-8", path.display()))
}

/// Controller-level paths, all derived from the repository root.
#[derive(Debug, Clone)]
pub struct TrenchPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub config_path: PathBuf,
    pub registry_path: PathBuf,
    pub last_cleanup_path: PathBuf,
    pub trenches_root: PathBuf,
}

impl TrenchPaths {
    pub fn new(root: impl Into<PathBuf>, trenches_dir: &str) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR_NAME);
        Self {
            locks_dir: state_dir.join("locks"),
            config_path: state_dir.join("config.toml"),
            registry_path: state_dir.join("processes.json"),
            last_cleanup_path: state_dir.join("last_cleanup"),
            trenches_root: root.join(trenches_dir),
            state_dir,
            root,
        }
    }

    /// Lock file for a named resource (`locks/<resource>.lock`).
    pub fn lock_path(&self, resource: &str) -> PathBuf {
        self.locks_dir.join(format!("{resource}.lock"))
    }

    pub fn session_lock_path(&self, name: &str) -> PathBuf {
        self.lock_path(&format!("session-{name}"))
    }

    pub fn session(&self, name: &str) -> SessionPaths {
        SessionPaths::new(workspace_path(&self.trenches_root, name))
    }

    /// Create the controller state and trenches directories, each self-ignored.
    pub fn ensure_layout(&self) -> Result<()> {
        ensure_self_ignored(&self.state_dir)?;
        fs::create_dir_all(&self.locks_dir)
            .with_context(|| format!("create directory {}", self.locks_dir.display()))?;
        ensure_self_ignored(&self.trenches_root)?;
        Ok(())
    }
}

/// Paths inside one session workspace.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub workspace: PathBuf,
    pub state_dir: PathBuf,
    pub status_path: PathBuf,
    pub events_dir: PathBuf,
    pub log_path: PathBuf,
}

impl SessionPaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let state_dir = workspace.join(STATE_DIR_NAME);
        Self {
            status_path: state_dir.join("status.json"),
            events_dir: state_dir.join("events"),
            log_path: state_dir.join("session.log"),
            state_dir,
            workspace,
        }
    }
}

/// Create `dir` with a `.gitignore` containing `*` so git never reports its contents.
pub fn ensure_self_ignored(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, "*\n").with_context(|| format!("write {}", gitignore.display()))?;
    }
    Ok(())
}
