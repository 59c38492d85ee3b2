//! Daily housekeeping: dead registry entries, stale sessions, git worktree metadata.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tracing::{debug, info, instrument};

use super::{Orchestrator, PruneReport};
use crate::io::atomic::write_atomic;
use crate::io::lock::ExclusiveLock;

#[derive(Debug, Clone)]
pub enum CleanupOutcome {
    /// The date marker shows a cleanup already ran today.
    AlreadyCleaned { date: NaiveDate },
    /// Another invocation holds the cleanup lock.
    InProgress,
    Completed {
        dead_processes: Vec<String>,
        pruned: PruneReport,
    },
}

impl Orchestrator {
    /// Run cleanup at most once per day (`force` ignores the date marker).
    ///
    /// Never waits: a concurrent cleanup is reported, not joined.
    #[instrument(skip_all, fields(force = force))]
    pub fn cleanup(&self, force: bool) -> Result<CleanupOutcome> {
        self.paths.ensure_layout()?;
        let mut lock = ExclusiveLock::new(self.paths.lock_path("cleanup"));
        if !lock.acquire(false, Duration::ZERO)? {
            debug!("cleanup lock busy");
            return Ok(CleanupOutcome::InProgress);
        }

        let today = Utc::now().date_naive();
        if !force && let Some(date) = self.last_cleanup()? && date == today {
            debug!(%date, "already cleaned today");
            return Ok(CleanupOutcome::AlreadyCleaned { date });
        }

        let dead_processes = self.tracker.cleanup_dead()?;
        let max_age = chrono::Duration::days(i64::from(self.config.cleanup_stale_days));
        let pruned = self.prune_stale(max_age, false)?;
        self.git.worktree_prune()?;

        let marker = format!("{}\n", today.format("%Y-%m-%d"));
        write_atomic(&self.paths.last_cleanup_path, marker.as_bytes())?;
        info!(
            dead = dead_processes.len(),
            pruned = pruned.candidates.len(),
            "cleanup finished"
        );
        Ok(CleanupOutcome::Completed {
            dead_processes,
            pruned,
        })
    }

    fn last_cleanup(&self) -> Result<Option<NaiveDate>> {
        let path = &self.paths.last_cleanup_path;
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        Ok(NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::CleanupOutcome;
    use crate::io::lock::ExclusiveLock;
    use crate::test_support::TestRepo;

    #[test]
    fn runs_once_per_day_unless_forced() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        orch.tracker().register(u32::MAX - 1, "ghost").expect("register");

        let first = orch.cleanup(false).expect("cleanup");
        let CleanupOutcome::Completed { dead_processes, .. } = first else {
            panic!("expected a completed cleanup, got {first:?}");
        };
        assert_eq!(dead_processes, vec!["ghost".to_string()]);

        assert!(matches!(
            orch.cleanup(false).expect("cleanup"),
            CleanupOutcome::AlreadyCleaned { .. }
        ));
        assert!(matches!(
            orch.cleanup(true).expect("cleanup"),
            CleanupOutcome::Completed { .. }
        ));
    }

    #[test]
    fn concurrent_cleanup_is_reported_not_awaited() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        let _held = ExclusiveLock::hold(orch.paths().lock_path("cleanup"), Duration::from_secs(1))
            .expect("hold");
        assert!(matches!(
            orch.cleanup(true).expect("cleanup"),
            CleanupOutcome::InProgress
        ));
    }

    #[test]
    fn prunes_sessions_older_than_cleanup_threshold() {
        let repo = TestRepo::new().expect("repo");
        let orch = repo.orchestrator();
        orch.spawn("ancient", None).expect("spawn");
        repo.age_session(&orch, "ancient", chrono::Duration::days(8))
            .expect("age");
        let outcome = orch.cleanup(false).expect("cleanup");
        let CleanupOutcome::Completed { pruned, .. } = outcome else {
            panic!("expected completed cleanup");
        };
        assert_eq!(pruned.pruned().count(), 1);
        assert!(!orch.session_paths("ancient").workspace.exists());
    }
}
