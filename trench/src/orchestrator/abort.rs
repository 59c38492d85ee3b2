//! `abort`: discard a session and reclaim whatever of it exists.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use super::Orchestrator;
use crate::core::naming::validate_name;
use crate::core::types::{SessionRecord, SessionStatus};
use crate::error::TrenchError;
use crate::io::git::Git;
use crate::io::paths::STATE_DIR_NAME;
use crate::io::session_store::load_record;

#[derive(Debug, Clone, Default)]
pub struct AbortOutcome {
    /// Status before the abort; `None` when no readable record existed.
    pub previous: Option<SessionStatus>,
    pub terminated_process: bool,
    pub workspace_removed: bool,
    pub branch_deleted: bool,
}

impl Orchestrator {
    /// Abort session `name`.
    ///
    /// Uncommitted changes in the workspace (other than orchestrator state)
    /// block the abort unless `force` is set. Partially created sessions are
    /// reclaimed as far as they exist.
    #[instrument(skip_all, fields(name = %name, force = force))]
    pub fn abort(&self, name: &str, force: bool) -> Result<AbortOutcome> {
        validate_name(name)?;
        let _lock = self.lock_session(name)?;
        let record = load_record(&self.session_paths(name))?;
        self.abort_locked(name, record, force)
    }

    /// Abort with the session lock already held and `record` freshly loaded under it.
    pub(super) fn abort_locked(
        &self,
        name: &str,
        record: Option<SessionRecord>,
        force: bool,
    ) -> Result<AbortOutcome> {
        let paths = self.session_paths(name);
        let branch = self.branch_for(name);

        let workspace_exists = paths.workspace.exists();
        let branch_exists = self.git.branch_exists(&branch)?;
        if record.is_none() && !workspace_exists && !branch_exists {
            return Err(TrenchError::NotFound(name.to_string()).into());
        }

        // Only a real worktree has a `.git` entry; a bare directory would make
        // git report on the controller instead.
        if workspace_exists && !force && paths.workspace.join(".git").exists() {
            let ignored = format!("{STATE_DIR_NAME}/");
            let changes = Git::new(&paths.workspace)
                .changes_except_prefixes(&[ignored.as_str()])
                .with_context(|| format!("inspect workspace of session '{name}'"))?;
            if !changes.is_empty() {
                let listing = changes
                    .iter()
                    .map(|entry| format!("  {} {}", entry.code, entry.path))
                    .collect::<Vec<_>>()
                    .join("\n");
                return Err(TrenchError::DirtyWorkspace {
                    name: name.to_string(),
                    changes: listing,
                }
                .into());
            }
        }

        let mut outcome = AbortOutcome {
            previous: record.as_ref().map(|record| record.status),
            ..AbortOutcome::default()
        };
        outcome.terminated_process = match self.tracker.terminate(name) {
            Ok(terminated) => terminated,
            Err(err) => {
                warn!(name, err = %format!("{err:#}"), "could not terminate agent, reclaiming anyway");
                false
            }
        };

        if let Some(mut record) = record
            && !record.status.is_terminal()
        {
            self.transition(&paths, &mut record, SessionStatus::Aborted)?;
        }

        if workspace_exists {
            self.remove_workspace(&paths.workspace)?;
            outcome.workspace_removed = true;
        }
        if branch_exists {
            self.git.delete_branch(&branch, true)?;
            outcome.branch_deleted = true;
        }
        if self.tracker.unregister(name)?.is_none() && outcome.terminated_process {
            warn!(name, "terminated process had no registry entry left");
        }
        info!(
            name,
            previous = ?outcome.previous,
            terminated = outcome.terminated_process,
            "session aborted"
        );
        Ok(outcome)
    }
}
