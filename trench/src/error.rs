//! Error classes callers branch on.
//!
//! Everything else travels as plain `anyhow::Error` with context. These variants
//! are wrapped into `anyhow::Error` as well and recovered with `downcast_ref`.

use std::time::Duration;

use thiserror::Error;

use crate::core::types::SessionStatus;

#[derive(Debug, Error)]
pub enum TrenchError {
    #[error("invalid session name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("session '{name}' already exists ({detail})")]
    AlreadyExists { name: String, detail: String },

    #[error("session '{name}' is {actual}; {operation} requires {expected}")]
    InvalidState {
        name: String,
        operation: &'static str,
        expected: &'static str,
        actual: SessionStatus,
    },

    #[error("session '{name}': illegal transition {from} -> {to}")]
    IllegalTransition {
        name: String,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("lock {resource} is held by another invocation after waiting {waited:?}; try again later")]
    LockBusy { resource: String, waited: Duration },

    #[error("session '{name}' has uncommitted changes (use --force to discard):\n{changes}")]
    DirtyWorkspace { name: String, changes: String },

    #[error("verification of session '{name}' failed: {summary}")]
    VerificationFailed { name: String, summary: String },

    #[error("merge of session '{name}' failed:\n{detail}")]
    MergeConflict { name: String, detail: String },
}

impl TrenchError {
    /// True for errors raised before any side effect took place.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            TrenchError::InvalidName { .. }
                | TrenchError::NotFound(_)
                | TrenchError::AlreadyExists { .. }
                | TrenchError::InvalidState { .. }
                | TrenchError::IllegalTransition { .. }
                | TrenchError::DirtyWorkspace { .. }
        )
    }
}

/// Find a [`TrenchError`] anywhere in an error chain.
pub fn find_trench_error(err: &anyhow::Error) -> Option<&TrenchError> {
    err.chain().find_map(|cause| cause.downcast_ref::<TrenchError>())
}
