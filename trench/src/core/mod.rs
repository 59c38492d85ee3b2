//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod complexity;
pub mod events;
pub mod naming;
pub mod staleness;
pub mod types;
