//! Session event records and the pure reducer that folds them into a view.
//!
//! Events are facts; the reducer is the only place that interprets them. Current
//! status can therefore be rebuilt from the log alone, without trusting any
//! mutable status cell.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::SessionStatus;

pub const SPAWNED: &str = "spawned";
pub const LAUNCHED: &str = "launched";
pub const TRANSITION: &str = "transition";
pub const VERIFICATION_FINISHED: &str = "verification_finished";
pub const MERGE_FAILED: &str = "merge_failed";

/// One immutable entry of an event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    /// 1-indexed position in the log; the file name encodes the same number.
    pub seq: u64,
    #[serde(default)]
    pub payload: Value,
}

/// State folded from a session's events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    pub status: Option<SessionStatus>,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
    pub verifications: u32,
    pub events_seen: u64,
}

/// Pure reducer over session events.
///
/// Every event that carries a `status` field moves the view to that status.
/// Unknown event types only bump `events_seen`.
pub fn reduce_session(mut view: SessionView, event: &Event) -> SessionView {
    view.events_seen += 1;
    if let Some(status) = event
        .payload
        .get("status")
        .and_then(|value| serde_json::from_value::<SessionStatus>(value.clone()).ok())
    {
        view.status = Some(status);
    }
    match event.event_type.as_str() {
        SPAWNED => {
            view.pid = None;
            view.last_error = None;
        }
        LAUNCHED => {
            view.pid = event
                .payload
                .get("pid")
                .and_then(Value::as_u64)
                .and_then(|pid| u32::try_from(pid).ok());
        }
        VERIFICATION_FINISHED => {
            view.verifications += 1;
            view.last_error = error_field(&event.payload);
        }
        MERGE_FAILED => {
            view.last_error = error_field(&event.payload);
        }
        _ => {}
    }
    view
}

fn error_field(payload: &Value) -> Option<String> {
    payload
        .get("error")
        .and_then(Value::as_str)
        .filter(|err| !err.is_empty())
        .map(str::to_string)
}
