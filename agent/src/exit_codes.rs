//! Stable exit codes for agent CLI commands.

/// Command succeeded (for `run`, the cycle reached `Done`).
pub const OK: i32 = 0;
/// Invalid input: bad config, unreadable file, or a plan the validator rejected.
pub const INVALID: i32 = 1;
/// `agent run` finished in the `Failed` phase.
pub const FAILED: i32 = 2;
