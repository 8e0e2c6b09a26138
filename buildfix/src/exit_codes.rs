//! Stable exit codes for buildfix CLI commands.

/// Every project succeeded (or was cached as succeeded), or a maintenance
/// command finished.
pub const OK: i32 = 0;
/// Invalid config or arguments, or a failure before any project ran.
pub const INVALID: i32 = 1;
/// At least one project did not succeed.
pub const PROJECT_FAILED: i32 = 2;
