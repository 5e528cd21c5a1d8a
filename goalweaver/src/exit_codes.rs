//! Stable exit codes for `goalweaver` CLI commands.

/// Command succeeded; for runs, every goal is DONE.
pub const OK: i32 = 0;
/// Command failed due to invalid config, unreadable state or other errors.
pub const INVALID: i32 = 1;
/// The run converged with at least one FAILED goal.
pub const FAILED_GOALS: i32 = 2;
/// State could not be persisted within the flush retry budget.
pub const PERSIST_FAULT: i32 = 3;
