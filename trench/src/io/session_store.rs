//! Persisted session records (`<workspace>/.trench/status.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::types::SessionRecord;
use crate::io::atomic::write_json_atomic;
use crate::io::paths::{SessionPaths, ensure_self_ignored};

/// Read a record. `Ok(None)` if the file is missing or unreadable.
pub fn load_record(paths: &SessionPaths) -> Result<Option<SessionRecord>> {
    let contents = match fs::read_to_string(&paths.status_path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", paths.status_path.display()));
        }
    };
    match serde_json::from_str(&contents) {
        Ok(record) => Ok(Some(record)),
        Err(err) => {
            warn!(path = %paths.status_path.display(), err = %err, "unreadable session record");
            Ok(None)
        }
    }
}

/// Stamp `last_updated` and persist the record atomically.
pub fn save_record(paths: &SessionPaths, record: &mut SessionRecord) -> Result<()> {
    record.last_updated = Utc::now();
    ensure_self_ignored(&paths.state_dir)?;
    write_json_atomic(&paths.status_path, record)
        .with_context(|| format!("persist session '{}'", record.name))?;
    debug!(name = %record.name, status = %record.status, "session record saved");
    Ok(())
}

/// A workspace directory found under the trenches root.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub name: String,
    pub paths: SessionPaths,
    /// `None` when `status.json` is missing or corrupt.
    pub record: Option<SessionRecord>,
    /// Modification time of the workspace directory.
    pub modified: Option<DateTime<Utc>>,
}

/// Every session directory under `trenches_root`, sorted by name.
pub fn list_sessions(trenches_root: &Path) -> Result<Vec<SessionEntry>> {
    let entries = match fs::read_dir(trenches_root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", trenches_root.display()));
        }
    };
    let mut sessions = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", trenches_root.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        sessions.push(read_entry(name, entry.path())?);
    }
    sessions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sessions)
}

/// Re-read one session directory; `None` once the directory is gone.
pub fn load_session(trenches_root: &Path, name: &str) -> Result<Option<SessionEntry>> {
    let workspace = trenches_root.join(name);
    if !workspace.is_dir() {
        return Ok(None);
    }
    read_entry(name.to_string(), workspace).map(Some)
}

fn read_entry(name: String, workspace: PathBuf) -> Result<SessionEntry> {
    let modified = fs::metadata(&workspace)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    let paths = SessionPaths::new(workspace);
    let record = load_record(&paths)?;
    Ok(SessionEntry {
        name,
        paths,
        record,
        modified,
    })
}
