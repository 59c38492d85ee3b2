//! `prune_stale`: abort sessions that have not moved for too long.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use super::Orchestrator;
use crate::core::naming::validate_name;
use crate::core::staleness::{PruneDecision, prune_decision};
use crate::core::types::SessionStatus;
use crate::io::session_store::{SessionEntry, list_sessions, load_session};

/// A session selected for pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneCandidate {
    pub name: String,
    /// `None` for workspaces without a readable record.
    pub status: Option<SessionStatus>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    /// Stale sessions: reported on a dry run, aborted otherwise.
    pub candidates: Vec<PruneCandidate>,
    /// Candidates whose abort failed, with the error text.
    pub failures: Vec<(String, String)>,
    pub dry_run: bool,
}

impl PruneReport {
    pub fn pruned(&self) -> impl Iterator<Item = &PruneCandidate> {
        self.candidates
            .iter()
            .filter(|candidate| !self.failures.iter().any(|(name, _)| *name == candidate.name))
    }
}

impl Orchestrator {
    /// Find sessions idle for at least `max_age` and abort them (forced) unless `dry_run`.
    ///
    /// Recently updated sessions, `Running` sessions with a live agent, and
    /// merged sessions are kept. Sessions without a readable record are aged by
    /// their directory's modification time. Each candidate is re-assessed
    /// under its session lock before it is aborted.
    #[instrument(skip_all, fields(max_age_hours = max_age.num_hours(), dry_run = dry_run))]
    pub fn prune_stale(&self, max_age: Duration, dry_run: bool) -> Result<PruneReport> {
        let mut report = PruneReport {
            dry_run,
            ..PruneReport::default()
        };
        for entry in list_sessions(&self.paths.trenches_root)? {
            let Some(candidate) = self.assess(&entry, Utc::now(), max_age)? else {
                continue;
            };
            if dry_run {
                report.candidates.push(candidate);
                continue;
            }
            match self.prune_one(&entry.name, max_age) {
                Ok(Some(confirmed)) => {
                    info!(name = %entry.name, "pruned stale session");
                    report.candidates.push(confirmed);
                }
                Ok(None) => debug!(name = %entry.name, "session changed since scan, keeping"),
                Err(err) => {
                    warn!(name = %entry.name, err = %format!("{err:#}"), "prune failed");
                    report.failures.push((entry.name.clone(), format!("{err:#}")));
                    report.candidates.push(candidate);
                }
            }
        }
        Ok(report)
    }

    /// Lock, re-read, and abort `name` if it is still stale.
    fn prune_one(&self, name: &str, max_age: Duration) -> Result<Option<PruneCandidate>> {
        validate_name(name)?;
        let _lock = self.lock_session(name)?;
        let Some(entry) = load_session(&self.paths.trenches_root, name)? else {
            return Ok(None);
        };
        let Some(candidate) = self.assess(&entry, Utc::now(), max_age)? else {
            return Ok(None);
        };
        self.abort_locked(name, entry.record, true)?;
        Ok(Some(candidate))
    }

    fn assess(
        &self,
        entry: &SessionEntry,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Option<PruneCandidate>> {
        let status = entry.record.as_ref().map(|record| record.status);
        let Some(last_updated) = entry
            .record
            .as_ref()
            .map(|record| record.last_updated)
            .or(entry.modified)
        else {
            warn!(name = %entry.name, "cannot determine session age, keeping");
            return Ok(None);
        };
        let alive = status == Some(SessionStatus::Running) && self.tracker.is_alive(&entry.name)?;
        if prune_decision(status, last_updated, now, max_age, alive) != PruneDecision::Prune {
            return Ok(None);
        }
        Ok(Some(PruneCandidate {
            name: entry.name.clone(),
            status,
            last_updated,
        }))
    }
}
