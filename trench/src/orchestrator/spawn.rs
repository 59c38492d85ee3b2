//! `spawn`: allocate branch + worktree and persist a `Running` record.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::Orchestrator;
use crate::core::events::SPAWNED;
use crate::core::naming::validate_name;
use crate::core::types::{SessionRecord, SessionStatus};
use crate::error::TrenchError;
use crate::io::event_log::EventLog;
use crate::io::paths::{SessionPaths, utf8_path};
use crate::io::session_store::{load_record, save_record};

/// Which steps of a spawn completed, for rollback.
#[derive(Debug, Default)]
struct Materialized {
    branch: bool,
    worktree: bool,
}

impl Orchestrator {
    /// Create session `name` branched from `base` (default: the controller's current branch).
    ///
    /// On failure every completed step is undone and the original error is returned.
    #[instrument(skip_all, fields(name = %name, base = ?base))]
    pub fn spawn(&self, name: &str, base: Option<&str>) -> Result<SessionRecord> {
        validate_name(name)?;
        let _lock = self.lock_session(name)?;
        let paths = self.session_paths(name);
        let branch = self.branch_for(name);

        if let Some(existing) = load_record(&paths)?
            && !existing.status.is_terminal()
        {
            return Err(TrenchError::AlreadyExists {
                name: name.to_string(),
                detail: format!("session is {}", existing.status),
            }
            .into());
        }
        if paths.workspace.exists() {
            return Err(TrenchError::AlreadyExists {
                name: name.to_string(),
                detail: format!("workspace {} exists", paths.workspace.display()),
            }
            .into());
        }
        if self.git.branch_exists(&branch)? {
            return Err(TrenchError::AlreadyExists {
                name: name.to_string(),
                detail: format!("branch {branch} exists"),
            }
            .into());
        }

        let workspace = utf8_path(&paths.workspace)?.to_string();

        let base = match base {
            Some(base) => base.to_string(),
            None => self.git.current_branch().context("resolve base branch")?,
        };

        let mut done = Materialized::default();
        match self.materialize(name, &branch, &base, &workspace, &paths, &mut done) {
            Ok(record) => {
                info!(name, branch = %branch, base = %base, "session spawned");
                Ok(record)
            }
            Err(err) => {
                warn!(name, err = %format!("{err:#}"), "spawn failed, rolling back");
                self.rollback_spawn(&branch, &paths, &done);
                Err(err)
            }
        }
    }

    fn materialize(
        &self,
        name: &str,
        branch: &str,
        base: &str,
        workspace: &str,
        paths: &SessionPaths,
        done: &mut Materialized,
    ) -> Result<SessionRecord> {
        self.git
            .create_branch(branch, base)
            .with_context(|| format!("create branch {branch} from {base}"))?;
        done.branch = true;
        self.git
            .worktree_add(&paths.workspace, branch)
            .with_context(|| format!("add worktree {}", paths.workspace.display()))?;
        done.worktree = true;

        let mut record = SessionRecord::new(name, branch, workspace, Utc::now());
        save_record(paths, &mut record)?;
        EventLog::new(&paths.events_dir).emit(
            SPAWNED,
            json!({ "status": SessionStatus::Spawning, "branch": branch, "base": base }),
        )?;
        self.transition(paths, &mut record, SessionStatus::Running)?;
        Ok(record)
    }

    fn rollback_spawn(&self, branch: &str, paths: &SessionPaths, done: &Materialized) {
        if done.worktree
            && let Err(err) = self.remove_workspace(&paths.workspace)
        {
            warn!(err = %format!("{err:#}"), "rollback: could not remove worktree");
        }
        if done.branch
            && let Err(err) = self.git.delete_branch(branch, true)
        {
            warn!(err = %format!("{err:#}"), "rollback: could not delete branch");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::core::types::SessionStatus;
    use crate::error::{TrenchError, find_trench_error};
    use crate::io::git::Git;
    use crate::io::session_store::{load_record, save_record};
    use crate::test_support::TestRepo;

    #[test]
    fn spawn_creates_branch_worktree_and_running_record() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        let record = orch.spawn("feature-x", Some("main")).expect("spawn");

        assert_eq!(record.status, SessionStatus::Running);
        assert_eq!(record.branch, "trench/feature-x");
        let workspace = orch.session_paths("feature-x").workspace;
        assert!(workspace.join("README.md").is_file());
        assert_eq!(
            Git::new(&workspace).current_branch().expect("branch"),
            "trench/feature-x"
        );

        let events = orch.event_log("feature-x").read_all().expect("events");
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["spawned", "transition"]);
    }

    #[test]
    fn spawn_keeps_controller_and_workspace_clean() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        orch.spawn("clean", None).expect("spawn");
        assert!(Git::new(repo.path()).status_porcelain().expect("status").is_empty());
        let workspace = orch.session_paths("clean").workspace;
        assert!(Git::new(&workspace).status_porcelain().expect("status").is_empty());
    }

    #[test]
    fn spawn_refuses_every_non_terminal_session() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        orch.spawn("dup", None).expect("spawn");
        let paths = orch.session_paths("dup");

        for status in [
            SessionStatus::Spawning,
            SessionStatus::Running,
            SessionStatus::Testing,
            SessionStatus::Ready,
            SessionStatus::Failed,
        ] {
            let mut record = load_record(&paths).expect("load").expect("record");
            record.status = status;
            save_record(&paths, &mut record).expect("save");
            let before = fs::read(&paths.status_path).expect("read");

            let err = orch.spawn("dup", None).unwrap_err();
            let Some(TrenchError::AlreadyExists { detail, .. }) = find_trench_error(&err) else {
                panic!("{status}: expected already-exists, got {err:#}");
            };
            assert_eq!(*detail, format!("session is {status}"));
            assert_eq!(fs::read(&paths.status_path).expect("read"), before, "{status}");
        }
    }

    #[test]
    fn spawn_refuses_leftover_workspace_directory() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        std::fs::create_dir_all(orch.session_paths("left").workspace).expect("mkdir");
        let err = orch.spawn("left", None).unwrap_err();
        assert!(format!("{err}").contains("workspace"));
        assert!(!Git::new(repo.path()).branch_exists("trench/left").expect("branch"));
    }

    #[test]
    fn invalid_name_is_rejected_before_any_side_effect() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        let err = orch.spawn("../escape", None).unwrap_err();
        assert!(matches!(
            find_trench_error(&err),
            Some(TrenchError::InvalidName { .. })
        ));
        assert!(!orch.paths().state_dir.exists());
    }

    #[test]
    fn unknown_base_leaves_nothing_behind() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        let err = orch.spawn("broken", Some("no-such-ref")).unwrap_err();
        assert!(format!("{err:#}").contains("no-such-ref"));
        let git = Git::new(repo.path());
        assert!(!git.branch_exists("trench/broken").expect("branch"));
        assert!(!orch.session_paths("broken").workspace.exists());
    }

    #[test]
    fn rollback_after_worktree_added() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        // A base whose tree has a file named `.trench` makes the record write fail
        // after the worktree exists.
        repo.commit_file_in(repo.path(), ".trench", "not a directory\n", "block state dir")
            .expect("commit");
        repo.git(&["rm", "-q", ".trench"]).expect("git rm");
        repo.git(&["commit", "-q", "-m", "unblock"]).expect("git commit");

        let err = orch.spawn("blocked", Some("HEAD~1")).unwrap_err();
        assert!(format!("{err:#}").contains("blocked"), "{err:#}");
        assert!(!Git::new(repo.path()).branch_exists("trench/blocked").expect("branch"));
        assert!(!orch.session_paths("blocked").workspace.exists());
    }
}
