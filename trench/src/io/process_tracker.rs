//! Registry of supervised child processes with PID-reuse-resistant liveness.
//!
//! A bare `kill(pid, 0)` only says that *some* process owns the PID. Long after
//! a supervised child exits the OS may hand its PID to an unrelated process, so
//! a record is considered alive only while it is younger than `max_age` and
//! the machine has not rebooted since it was registered.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::atomic::write_json_atomic;
use crate::io::lock::ExclusiveLock;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedProcess {
    pub pid: u32,
    pub name: String,
    /// System monotonic clock at registration (milliseconds since boot).
    /// Only comparable within one boot.
    pub monotonic_start_ms: Option<u64>,
    /// Wall clock at registration; survives restarts of the tracker.
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    processes: BTreeMap<String, TrackedProcess>,
}

#[derive(Debug, Clone)]
pub struct ProcessTracker {
    registry_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    max_age: Duration,
}

impl ProcessTracker {
    pub fn new(registry_path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            registry_path: registry_path.into(),
            lock_path: lock_path.into(),
            lock_timeout: Duration::from_secs(10),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Record `pid` under `name`, replacing any previous record for that name.
    #[instrument(skip_all, fields(pid = pid, name = %name))]
    pub fn register(&self, pid: u32, name: &str) -> Result<TrackedProcess> {
        let record = TrackedProcess {
            pid,
            name: name.to_string(),
            monotonic_start_ms: monotonic_now_ms(),
            registered_at: Utc::now(),
        };
        self.insert(record.clone())?;
        info!(pid, name, "process registered");
        Ok(record)
    }

    /// Store a fully specified record (replacing any record with the same name).
    pub fn insert(&self, record: TrackedProcess) -> Result<()> {
        self.modify(|registry| {
            registry.processes.insert(record.name.clone(), record);
        })
    }

    /// Drop the record for `name`. Returns the removed record, if any.
    pub fn unregister(&self, name: &str) -> Result<Option<TrackedProcess>> {
        let mut removed = None;
        self.modify(|registry| removed = registry.processes.remove(name))?;
        if removed.is_some() {
            debug!(name, "process unregistered");
        }
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Result<Option<TrackedProcess>> {
        Ok(self.load()?.processes.remove(name))
    }

    pub fn list(&self) -> Result<Vec<TrackedProcess>> {
        Ok(self.load()?.processes.into_values().collect())
    }

    /// True only if `name` is registered, its PID answers a signal probe, and
    /// the record is young enough to trust that the PID was not recycled.
    pub fn is_alive(&self, name: &str) -> Result<bool> {
        Ok(self
            .get(name)?
            .is_some_and(|record| self.record_is_alive(&record)))
    }

    pub fn record_is_alive(&self, record: &TrackedProcess) -> bool {
        let age = Utc::now().signed_duration_since(record.registered_at);
        let too_old = age
            .to_std()
            .map(|age| age >= self.max_age)
            // Registered "in the future": the wall clock moved; don't trust it.
            .unwrap_or(true);
        if too_old {
            debug!(name = %record.name, pid = record.pid, "record exceeds max age");
            return false;
        }
        if let (Some(start), Some(now)) = (record.monotonic_start_ms, monotonic_now_ms())
            && start > now
        {
            debug!(name = %record.name, pid = record.pid, "registered before last boot");
            return false;
        }
        pid_exists(record.pid)
    }

    /// Poll until `name` is no longer alive. Returns `false` on timeout.
    pub fn wait_for_completion(
        &self,
        name: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive(name)? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(poll_interval);
        }
    }

    /// Remove every record that is not alive and return their names.
    #[instrument(skip_all)]
    pub fn cleanup_dead(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        self.modify(|registry| {
            registry.processes.retain(|name, record| {
                let alive = self.record_is_alive(record);
                if !alive {
                    removed.push(name.clone());
                }
                alive
            });
        })?;
        if !removed.is_empty() {
            info!(count = removed.len(), "removed dead process records");
        }
        Ok(removed)
    }

    /// Send SIGTERM to the process group of a live tracked process.
    ///
    /// Returns `false` if there was nothing we could signal: no live record,
    /// the process is gone, or the PID now belongs to another user.
    pub fn terminate(&self, name: &str) -> Result<bool> {
        let Some(record) = self.get(name)? else {
            return Ok(false);
        };
        if !self.record_is_alive(&record) {
            return Ok(false);
        }
        info!(name, pid = record.pid, "terminating tracked process");
        let delivered = terminate_group(record.pid)?;
        if !delivered {
            warn!(name, pid = record.pid, "tracked pid could not be signaled, treating as gone");
        }
        Ok(delivered)
    }

    fn load(&self) -> Result<Registry> {
        load_registry(&self.registry_path)
    }

    fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Registry),
    {
        let _lock = ExclusiveLock::hold(&self.lock_path, self.lock_timeout)?;
        let mut registry = self.load()?;
        change(&mut registry);
        write_json_atomic(&self.registry_path, &registry)
    }
}

fn load_registry(path: &Path) -> Result<Registry> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Registry::default()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    match serde_json::from_str(&contents) {
        Ok(registry) => Ok(registry),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "process registry unreadable, starting empty");
            Ok(Registry::default())
        }
    }
}

/// Milliseconds on the system monotonic clock (time since boot).
#[cfg(unix)]
fn monotonic_now_ms() -> Option<u64> {
    use nix::time::{ClockId, clock_gettime};

    let now = clock_gettime(ClockId::CLOCK_MONOTONIC).ok()?;
    let secs = u64::try_from(now.tv_sec()).ok()?;
    let nanos = u64::try_from(now.tv_nsec()).ok()?;
    Some(secs * 1000 + nanos / 1_000_000)
}

#[cfg(not(unix))]
fn monotonic_now_ms() -> Option<u64> {
    None
}

/// No-op signal probe. `EPERM` means the process exists but belongs to someone else.
#[cfg(unix)]
pub fn pid_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn pid_exists(_pid: u32) -> bool {
    false
}

/// SIGTERM the process group led by `pid`, falling back to the process itself.
///
/// Returns whether a signal was delivered.
#[cfg(unix)]
fn terminate_group(pid: u32) -> Result<bool> {
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).with_context(|| format!("pid {pid} out of range"))?;
    let target = Pid::from_raw(raw);
    if let Err(err) = killpg(target, Signal::SIGTERM) {
        // Not a group leader (or the group is gone): signal the process itself.
        debug!(pid, err = %err, "killpg failed, signaling process directly");
        return signal_delivered(kill(target, Signal::SIGTERM))
            .with_context(|| format!("terminate pid {pid}"));
    }
    Ok(true)
}

/// `ESRCH` (gone) and `EPERM` (PID recycled to another user) both mean our
/// process is no longer there to signal.
#[cfg(unix)]
fn signal_delivered(result: nix::Result<()>) -> Result<bool, nix::errno::Errno> {
    use nix::errno::Errno;

    match result {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH | Errno::EPERM) => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(not(unix))]
fn terminate_group(pid: u32) -> Result<bool> {
    anyhow::bail!("terminating pid {pid} is only supported on unix")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn tracker(root: &Path) -> ProcessTracker {
        ProcessTracker::new(root.join("processes.json"), root.join("locks/processes.lock"))
    }

    #[test]
    fn own_process_is_alive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker(temp.path());
        tracker.register(std::process::id(), "self").expect("register");
        assert!(tracker.is_alive("self").expect("alive"));
    }

    #[test]
    fn unknown_name_is_not_alive() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(!tracker(temp.path()).is_alive("ghost").expect("alive"));
    }

    #[test]
    fn register_overwrites_by_name_and_persists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = tracker(temp.path());
        first.register(11, "a").expect("register");
        first.register(22, "a").expect("register");

        let reopened = tracker(temp.path());
        let record = reopened.get("a").expect("get").expect("record");
        assert_eq!(record.pid, 22);
        assert_eq!(reopened.list().expect("list").len(), 1);
    }

    #[test]
    fn old_record_is_dead_even_if_pid_is_live() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker(temp.path());
        // Our own PID is certainly live; only the age check can reject it.
        tracker
            .insert(TrackedProcess {
                pid: std::process::id(),
                name: "recycled".to_string(),
                monotonic_start_ms: None,
                registered_at: Utc::now() - chrono::Duration::days(8),
            })
            .expect("insert");
        assert!(!tracker.is_alive("recycled").expect("alive"));
    }

    #[test]
    fn custom_max_age_applies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker(temp.path()).with_max_age(Duration::from_secs(60));
        tracker
            .insert(TrackedProcess {
                pid: std::process::id(),
                name: "hour-old".to_string(),
                monotonic_start_ms: None,
                registered_at: Utc::now() - chrono::Duration::hours(1),
            })
            .expect("insert");
        assert!(!tracker.is_alive("hour-old").expect("alive"));
    }

    #[test]
    fn record_from_before_reboot_is_dead() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker(temp.path());
        tracker
            .insert(TrackedProcess {
                pid: std::process::id(),
                name: "pre-boot".to_string(),
                monotonic_start_ms: Some(u64::MAX),
                registered_at: Utc::now(),
            })
            .expect("insert");
        assert!(!tracker.is_alive("pre-boot").expect("alive"));
    }

    #[test]
    fn exited_child_is_dead_and_cleaned_up() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker(temp.path());
        let mut child = Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        child.wait().expect("reap");

        tracker.register(pid, "done").expect("register");
        tracker.register(std::process::id(), "self").expect("register");
        assert!(!tracker.is_alive("done").expect("alive"));

        let removed = tracker.cleanup_dead().expect("cleanup");
        assert_eq!(removed, vec!["done".to_string()]);
        assert!(tracker.get("self").expect("get").is_some());
    }

    #[test]
    fn wait_for_completion_sees_exit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker(temp.path());
        let mut child = Command::new("sleep").arg("0.3").spawn().expect("spawn");
        tracker.register(child.id(), "sleeper").expect("register");

        let reaper = std::thread::spawn(move || child.wait().expect("wait"));
        let finished = tracker
            .wait_for_completion("sleeper", Duration::from_secs(10), Duration::from_millis(20))
            .expect("wait");
        assert!(finished);
        reaper.join().expect("reaper");
    }

    #[test]
    fn wait_for_completion_times_out() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker(temp.path());
        tracker.register(std::process::id(), "self").expect("register");
        let finished = tracker
            .wait_for_completion("self", Duration::from_millis(100), Duration::from_millis(20))
            .expect("wait");
        assert!(!finished);
    }

    #[cfg(unix)]
    #[test]
    fn foreign_or_missing_pid_is_not_an_error() {
        use nix::errno::Errno;

        assert_eq!(signal_delivered(Ok(())), Ok(true));
        assert_eq!(signal_delivered(Err(Errno::ESRCH)), Ok(false));
        assert_eq!(signal_delivered(Err(Errno::EPERM)), Ok(false));
        assert_eq!(signal_delivered(Err(Errno::EINVAL)), Err(Errno::EINVAL));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_of_vanished_process_reports_nothing_signaled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker(temp.path());
        let mut child = Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        child.wait().expect("reap");
        tracker.register(pid, "done").expect("register");
        assert!(!tracker.terminate("done").expect("terminate"));
    }

    #[test]
    fn corrupt_registry_reads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("processes.json"), "garbage").expect("write");
        let tracker = tracker(temp.path());
        assert!(tracker.list().expect("list").is_empty());
        tracker.register(1, "init").expect("register over corrupt file");
    }
}
