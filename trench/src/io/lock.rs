//! Advisory cross-process locks backed by `flock` on a lock file.
//!
//! A lock protects whatever the callers agree it protects: two invocations
//! coordinate only if they use the same lock path. Lock files are created on
//! demand and never deleted here; unlinking a lock file while someone else may
//! be about to open it would let two holders lock different inodes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{debug, trace};

use crate::error::TrenchError;

/// Interval between attempts while waiting for a held lock.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle over one lock file. Holds the lock between a successful
/// [`acquire`](ExclusiveLock::acquire) and [`release`](ExclusiveLock::release) or drop.
#[derive(Debug)]
pub struct ExclusiveLock {
    path: PathBuf,
    file: Option<File>,
}

impl ExclusiveLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// Acquire the lock or fail with [`TrenchError::LockBusy`] after `timeout`.
    pub fn hold(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let mut lock = Self::new(path);
        if !lock.acquire(true, timeout)? {
            return Err(TrenchError::LockBusy {
                resource: lock.path.display().to_string(),
                waited: timeout,
            }
            .into());
        }
        Ok(lock)
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Try to take the lock.
    ///
    /// Returns `Ok(false)` when another holder keeps it past `timeout` (blocking)
    /// or right away (non-blocking). Errors are reserved for I/O failures such
    /// as an unwritable lock directory. Acquiring a lock this handle already
    /// holds succeeds immediately.
    pub fn acquire(&mut self, blocking: bool, timeout: Duration) -> Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        let file = self.open()?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %self.path.display(), "lock acquired");
                    self.file = Some(file);
                    return Ok(true);
                }
                Err(err) if is_contended(&err) => {
                    if !blocking || Instant::now() >= deadline {
                        debug!(path = %self.path.display(), blocking, "lock busy");
                        return Ok(false);
                    }
                    trace!(path = %self.path.display(), "lock busy, polling");
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("lock {}", self.path.display()));
                }
            }
        }
    }

    /// Release the lock. Calling this on a handle that does not hold the lock is a no-op.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            // Closing the descriptor drops the flock even if unlock fails.
            if let Err(err) = FileExt::unlock(&file) {
                debug!(path = %self.path.display(), err = %err, "explicit unlock failed");
            }
            debug!(path = %self.path.display(), "lock released");
        }
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock directory {}", parent.display()))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("open lock file {}", self.path.display()))
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
