//! Append-only event log: one immutable JSON file per event.
//!
//! Files are named `<seq:08>-<type>.json`. Ordering comes from the sequence
//! number in the name, never from modification times. Emission derives the
//! next sequence number from the number of event files already present, so
//! concurrent writers must serialize emission with an
//! [`ExclusiveLock`](crate::io::lock::ExclusiveLock). Creation is no-clobber,
//! so an unserialized race fails loudly instead of overwriting an event.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::events::Event;
use crate::io::atomic::write_atomic_new;

/// Identity of an emitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventId {
    pub seq: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    dir: PathBuf,
}

impl EventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Append an event and return its identity.
    pub fn emit(&self, event_type: &str, payload: Value) -> Result<EventId> {
        let seq = self.event_files()?.len() as u64 + 1;
        let event = Event {
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            seq,
            payload,
        };
        let path = self.dir.join(event_file_name(seq, event_type));
        let mut buf = serde_json::to_string_pretty(&event).context("serialize event")?;
        buf.push('\n');
        write_atomic_new(&path, buf.as_bytes())
            .with_context(|| format!("emit event {seq} ({event_type})"))?;
        debug!(dir = %self.dir.display(), seq, event_type, "event emitted");
        Ok(EventId { seq, path })
    }

    /// All readable events in sequence order. Unparseable files are skipped.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        let files = self.event_files()?;
        Ok(files
            .iter()
            .filter_map(|(seq, path)| read_event(*seq, path))
            .collect())
    }

    /// Fold every readable event through `reducer`, starting at `initial`.
    pub fn compute_state<S, F>(&self, reducer: F, initial: S) -> Result<S>
    where
        F: Fn(S, &Event) -> S,
    {
        Ok(self.read_all()?.iter().fold(initial, reducer))
    }

    /// The last `n` readable events, parsing only the files needed.
    pub fn tail(&self, n: usize) -> Result<Vec<Event>> {
        let files = self.event_files()?;
        let mut events: Vec<Event> = files
            .iter()
            .rev()
            .filter_map(|(seq, path)| read_event(*seq, path))
            .take(n)
            .collect();
        events.reverse();
        Ok(events)
    }

    /// `(seq, path)` for every file that looks like an event, sorted by seq.
    fn event_files(&self) -> Result<Vec<(u64, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read event dir {}", self.dir.display()));
            }
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", self.dir.display()))?;
            let name = entry.file_name();
            if let Some(seq) = parse_seq(&name.to_string_lossy()) {
                files.push((seq, entry.path()));
            }
        }
        files.sort_by_key(|(seq, _)| *seq);
        Ok(files)
    }
}

fn event_file_name(seq: u64, event_type: &str) -> String {
    let safe_type: String = event_type
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("{seq:08}-{safe_type}.json")
}

fn parse_seq(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".json")?;
    let (seq, event_type) = stem.split_once('-')?;
    if event_type.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    seq.parse().ok()
}

fn read_event(seq: u64, path: &Path) -> Option<Event> {
    let parsed = fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|raw| serde_json::from_str::<Event>(&raw).map_err(anyhow::Error::from));
    match parsed {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(seq, path = %path.display(), err = %err, "skipping unreadable event");
            None
        }
    }
}
