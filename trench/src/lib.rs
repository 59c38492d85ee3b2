//! Concurrent, isolated agent sessions over one git repository.
//!
//! Each session gets its own branch and linked worktree, an optional
//! supervised agent process, and a verification gate before it can be merged
//! back. Several invocations may run at once; they coordinate through lock
//! files and atomically replaced state files.
//!
//! - **[`core`]**: Pure, deterministic logic (status table, naming, task
//!   classification, event reduction, staleness). No I/O.
//! - **[`io`]**: Side-effecting primitives (atomic writes, locks, event logs,
//!   process registry, git, child processes).
//!
//! The [`orchestrator`] composes both into the session lifecycle that the CLI
//! commands drive.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod logs;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
