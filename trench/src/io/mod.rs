//! Side-effecting building blocks: files, locks, git, and child processes.

pub mod atomic;
pub mod config;
pub mod event_log;
pub mod git;
pub mod launcher;
pub mod lock;
pub mod paths;
pub mod process;
pub mod process_tracker;
pub mod session_store;
