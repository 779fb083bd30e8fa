//! Stable exit codes for genesis CLI commands.

/// Command succeeded; a run persisted a RESULT message.
pub const OK: i32 = 0;
/// Invalid input, config or run identity, or an infrastructure failure.
pub const INVALID: i32 = 1;
/// The run completed but persisted an ERROR message.
pub const RUN_ERROR: i32 = 2;
