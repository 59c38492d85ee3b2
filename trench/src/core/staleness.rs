//! Pure staleness decision used by `prune`.

use chrono::{DateTime, Duration, Utc};

use crate::core::types::SessionStatus;

/// Why a session was kept or selected during pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneDecision {
    /// Updated more recently than the threshold.
    KeepRecent,
    /// `Running` with a live supervised process.
    KeepAlive,
    /// Already merged; nothing left to reclaim.
    KeepMerged,
    Prune,
}

/// Decide whether a session is stale.
///
/// `status` is `None` when the record is unreadable; such partial sessions are
/// judged by age alone.
pub fn prune_decision(
    status: Option<SessionStatus>,
    last_updated: DateTime<Utc>,
    now: DateTime<Utc>,
    max_age: Duration,
    process_alive: bool,
) -> PruneDecision {
    if now.signed_duration_since(last_updated) < max_age {
        return PruneDecision::KeepRecent;
    }
    match status {
        Some(SessionStatus::Merged) => PruneDecision::KeepMerged,
        Some(SessionStatus::Running) if process_alive => PruneDecision::KeepAlive,
        _ => PruneDecision::Prune,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days_ago(days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::days(days), now)
    }

    #[test]
    fn recent_sessions_are_kept() {
        let (updated, now) = days_ago(1);
        let decision = prune_decision(
            Some(SessionStatus::Failed),
            updated,
            now,
            Duration::days(3),
            false,
        );
        assert_eq!(decision, PruneDecision::KeepRecent);
    }

    #[test]
    fn old_dead_running_session_is_pruned() {
        let (updated, now) = days_ago(10);
        let decision = prune_decision(
            Some(SessionStatus::Running),
            updated,
            now,
            Duration::days(3),
            false,
        );
        assert_eq!(decision, PruneDecision::Prune);
    }

    #[test]
    fn old_running_session_with_live_process_is_kept() {
        let (updated, now) = days_ago(10);
        let decision = prune_decision(
            Some(SessionStatus::Running),
            updated,
            now,
            Duration::days(3),
            true,
        );
        assert_eq!(decision, PruneDecision::KeepAlive);
    }

    #[test]
    fn liveness_only_protects_running_sessions() {
        let (updated, now) = days_ago(10);
        let decision = prune_decision(
            Some(SessionStatus::Failed),
            updated,
            now,
            Duration::days(3),
            true,
        );
        assert_eq!(decision, PruneDecision::Prune);
    }

    #[test]
    fn merged_and_unreadable_sessions() {
        let (updated, now) = days_ago(10);
        assert_eq!(
            prune_decision(
                Some(SessionStatus::Merged),
                updated,
                now,
                Duration::days(3),
                false
            ),
            PruneDecision::KeepMerged
        );
        assert_eq!(
            prune_decision(None, updated, now, Duration::days(3), false),
            PruneDecision::Prune
        );
    }
}
