//! Session lifecycle state machine.
//!
//! Every mutating operation takes the per-session lock
//! (`locks/session-<name>.lock`) before reading the record, so
//! read-modify-write sequences on one session are linearized across
//! invocations. Status is always re-read from disk; nothing is cached between
//! calls.

mod abort;
mod cleanup;
mod launch;
mod merge;
mod prune;
mod spawn;
mod verify;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::core::events::TRANSITION;
use crate::core::naming::{branch_name, validate_name};
use crate::core::types::{SessionRecord, SessionStatus};
use crate::error::TrenchError;
use crate::io::config::{TrenchConfig, load_config};
use crate::io::event_log::EventLog;
use crate::io::git::Git;
use crate::io::lock::ExclusiveLock;
use crate::io::paths::{STATE_DIR_NAME, SessionPaths, TrenchPaths};
use crate::io::process_tracker::ProcessTracker;
use crate::io::session_store::{list_sessions, load_record, save_record};

pub use abort::AbortOutcome;
pub use cleanup::CleanupOutcome;
pub use launch::LaunchOutcome;
pub use merge::MergeOutcome;
pub use prune::{PruneCandidate, PruneReport};
pub use verify::VerifyOutcome;

/// One session as reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    #[serde(flatten)]
    pub record: SessionRecord,
    /// Whether the recorded agent is alive according to the process registry.
    pub process_alive: bool,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    paths: TrenchPaths,
    config: TrenchConfig,
    git: Git,
    tracker: ProcessTracker,
}

impl Orchestrator {
    /// Orchestrator for the repository at `root` with an explicit config.
    pub fn new(root: impl Into<PathBuf>, config: TrenchConfig) -> Self {
        let root = root.into();
        let paths = TrenchPaths::new(&root, &config.trenches_dir);
        let lock_timeout = Duration::from_secs(config.lock_timeout_secs);
        let max_age = Duration::from_secs(u64::from(config.process_max_age_days) * 24 * 60 * 60);
        let tracker = ProcessTracker::new(&paths.registry_path, paths.lock_path("processes"))
            .with_lock_timeout(lock_timeout)
            .with_max_age(max_age);
        Self {
            git: Git::new(&root),
            paths,
            config,
            tracker,
        }
    }

    /// Orchestrator for `root`, reading `.trench/config.toml` if present.
    pub fn open(root: &Path) -> Result<Self> {
        let config = load_config(&root.join(STATE_DIR_NAME).join("config.toml"))?;
        Ok(Self::new(root, config))
    }

    pub fn paths(&self) -> &TrenchPaths {
        &self.paths
    }

    pub fn config(&self) -> &TrenchConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    pub fn session_paths(&self, name: &str) -> SessionPaths {
        self.paths.session(name)
    }

    pub fn event_log(&self, name: &str) -> EventLog {
        EventLog::new(self.session_paths(name).events_dir)
    }

    /// Read one session (`None` for all), without side effects.
    ///
    /// A missing or unreadable record is not-found for a single name; listing
    /// skips such directories.
    pub fn status(&self, name: Option<&str>) -> Result<Vec<SessionReport>> {
        match name {
            Some(name) => {
                validate_name(name)?;
                let record = load_record(&self.session_paths(name))?
                    .ok_or_else(|| TrenchError::NotFound(name.to_string()))?;
                Ok(vec![self.report(record)?])
            }
            None => {
                let mut reports = Vec::new();
                for entry in list_sessions(&self.paths.trenches_root)? {
                    match entry.record {
                        Some(record) => reports.push(self.report(record)?),
                        None => warn!(name = %entry.name, "skipping session without readable status"),
                    }
                }
                Ok(reports)
            }
        }
    }

    fn report(&self, record: SessionRecord) -> Result<SessionReport> {
        let process_alive = record.pid.is_some() && self.tracker.is_alive(&record.name)?;
        Ok(SessionReport {
            record,
            process_alive,
        })
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.config.lock_timeout_secs)
    }

    fn lock_session(&self, name: &str) -> Result<ExclusiveLock> {
        self.paths.ensure_layout()?;
        ExclusiveLock::hold(self.paths.session_lock_path(name), self.lock_timeout())
    }

    fn branch_for(&self, name: &str) -> String {
        branch_name(&self.config.branch_prefix, name)
    }

    /// Load a record that must exist.
    fn load_existing(&self, name: &str) -> Result<(SessionPaths, SessionRecord)> {
        let paths = self.session_paths(name);
        let record =
            load_record(&paths)?.ok_or_else(|| TrenchError::NotFound(name.to_string()))?;
        Ok((paths, record))
    }

    /// Transition, persist, and log the change. Caller holds the session lock.
    fn advance(
        &self,
        paths: &SessionPaths,
        record: &mut SessionRecord,
        next: SessionStatus,
        event_type: &str,
        mut payload: Value,
    ) -> Result<()> {
        let from = record.status;
        record.transition(next)?;
        save_record(paths, record)?;
        if let Value::Object(map) = &mut payload {
            map.insert("from".to_string(), json!(from));
            map.insert("status".to_string(), json!(next));
        }
        EventLog::new(&paths.events_dir).emit(event_type, payload)?;
        debug!(name = %record.name, %from, to = %next, "session transitioned");
        Ok(())
    }

    fn transition(
        &self,
        paths: &SessionPaths,
        record: &mut SessionRecord,
        next: SessionStatus,
    ) -> Result<()> {
        self.advance(paths, record, next, TRANSITION, json!({}))
    }

    /// Remove a session workspace, falling back to deleting the directory and
    /// pruning git's worktree metadata.
    fn remove_workspace(&self, workspace: &Path) -> Result<()> {
        if let Err(err) = self.git.worktree_remove(workspace, true) {
            warn!(path = %workspace.display(), err = %format!("{err:#}"), "worktree remove failed, deleting directory");
            if workspace.exists() {
                fs::remove_dir_all(workspace)
                    .with_context(|| format!("remove {}", workspace.display()))?;
            }
            self.git.worktree_prune()?;
        }
        Ok(())
    }
}
