//! Stable exit codes for agent CLI commands.

/// Command succeeded; for `run`, the task COMPLETED.
pub const OK: i32 = 0;
/// Invalid input, configuration or storage error.
pub const INVALID: i32 = 1;
/// `run` finished with the task FAILED.
pub const TASK_FAILED: i32 = 2;
/// `run` finished with the task CANCELLED.
pub const TASK_CANCELLED: i32 = 3;
/// `check` found safety violations.
pub const UNSAFE: i32 = 4;
/// `exec` did not compile and run successfully.
pub const EXEC_FAILED: i32 = 5;
