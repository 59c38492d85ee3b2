//! Shared deterministic types for the session lifecycle.
//!
//! These types define the contract between the orchestrator and everything that
//! reads persisted session state. They carry no I/O.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrenchError;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Spawning,
    Running,
    Testing,
    Ready,
    Failed,
    Merged,
    Aborted,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 7] = [
        SessionStatus::Spawning,
        SessionStatus::Running,
        SessionStatus::Testing,
        SessionStatus::Ready,
        SessionStatus::Failed,
        SessionStatus::Merged,
        SessionStatus::Aborted,
    ];

    /// `Merged` and `Aborted` end the lifecycle; the record is destroyed with them.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Merged | SessionStatus::Aborted)
    }

    /// Explicit transition table.
    ///
    /// ```text
    /// Spawning -> Running
    /// Running | Testing | Ready | Failed -> Testing   (verification (re)started)
    /// Testing -> Ready | Failed
    /// Ready -> Merged | Failed                         (merge, merge conflict)
    /// any non-terminal -> Aborted
    /// ```
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::{Aborted, Failed, Merged, Ready, Running, Spawning, Testing};
        if self.is_terminal() {
            return false;
        }
        match next {
            Aborted => true,
            Running => self == Spawning,
            Testing => matches!(self, Running | Testing | Ready | Failed),
            Ready => self == Testing,
            Failed => matches!(self, Testing | Ready),
            Merged => self == Ready,
            Spawning => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Spawning => "spawning",
            SessionStatus::Running => "running",
            SessionStatus::Testing => "testing",
            SessionStatus::Ready => "ready",
            SessionStatus::Failed => "failed",
            SessionStatus::Merged => "merged",
            SessionStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability tier the supervised agent was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        };
        f.write_str(label)
    }
}

/// Persisted state of one session (`<workspace>/.trench/status.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub name: String,
    pub branch: String,
    pub workspace_path: String,
    pub status: SessionStatus,
    pub created: DateTime<Utc>,
    /// Advances on every persisted mutation; staleness is measured from here.
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub test_output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub complexity: Option<Complexity>,
}

impl SessionRecord {
    /// New record in `Spawning` state.
    pub fn new(name: &str, branch: &str, workspace_path: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            branch: branch.to_string(),
            workspace_path: workspace_path.to_string(),
            status: SessionStatus::Spawning,
            created: now,
            last_updated: now,
            test_output: String::new(),
            error: String::new(),
            pid: None,
            task: None,
            model: None,
            complexity: None,
        }
    }

    /// Move to `next`, refusing transitions outside the table.
    ///
    /// Does not touch `last_updated`; the store stamps it on write.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), TrenchError> {
        if !self.status.can_transition_to(next) {
            return Err(TrenchError::IllegalTransition {
                name: self.name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: SessionStatus) -> SessionRecord {
        let mut record = SessionRecord::new("s", "trench/s", "/tmp/s", Utc::now());
        record.status = status;
        record
    }

    #[test]
    fn terminal_states_allow_no_transitions() {
        for from in [SessionStatus::Merged, SessionStatus::Aborted] {
            for to in SessionStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn every_non_terminal_state_can_abort() {
        for from in SessionStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(from.can_transition_to(SessionStatus::Aborted), "{from}");
        }
    }

    #[test]
    fn only_ready_can_merge() {
        for from in SessionStatus::ALL {
            assert_eq!(
                from.can_transition_to(SessionStatus::Merged),
                from == SessionStatus::Ready,
                "{from}"
            );
        }
    }

    #[test]
    fn illegal_transition_leaves_record_unchanged() {
        let mut rec = record(SessionStatus::Running);
        let before = rec.clone();
        let err = rec.transition(SessionStatus::Merged).unwrap_err();
        assert!(matches!(err, TrenchError::IllegalTransition { .. }));
        assert_eq!(rec, before);
    }

    #[test]
    fn verification_path_is_legal() {
        let mut rec = record(SessionStatus::Spawning);
        rec.transition(SessionStatus::Running).expect("running");
        rec.transition(SessionStatus::Testing).expect("testing");
        rec.transition(SessionStatus::Failed).expect("failed");
        rec.transition(SessionStatus::Testing).expect("retest");
        rec.transition(SessionStatus::Ready).expect("ready");
        rec.transition(SessionStatus::Merged).expect("merged");
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Ready).expect("serialize");
        assert_eq!(json, "\"ready\"");
    }

    #[test]
    fn record_tolerates_missing_optional_fields() {
        let json = r#"{
            "name": "a",
            "branch": "trench/a",
            "workspace_path": "/w/a",
            "status": "running",
            "created": "2026-01-01T00:00:00Z",
            "last_updated": "2026-01-01T00:00:00Z"
        }"#;
        let rec: SessionRecord = serde_json::from_str(json).expect("parse");
        assert_eq!(rec.status, SessionStatus::Running);
        assert!(rec.pid.is_none());
        assert!(rec.test_output.is_empty());
    }
}
