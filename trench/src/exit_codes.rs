//! Stable exit codes for trench CLI commands.

/// Command succeeded (including informational no-op outcomes).
pub const OK: i32 = 0;
/// External tool failure, I/O error, or anything not classified below.
pub const FAILED: i32 = 1;
/// The session was missing, in the wrong state, or the name was invalid.
/// Nothing was changed.
pub const STATE: i32 = 2;
/// A lock was held by another invocation; try again later.
pub const BUSY: i32 = 3;
/// Verification ran and failed, or a merge conflicted.
pub const VERIFY_FAILED: i32 = 4;
