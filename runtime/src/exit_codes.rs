//! Stable exit codes for `agent-runtime` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, invalid config or any other error.
pub const INVALID: i32 = 1;
/// `classify` or `resolve-binary` hit a startup failure that retrying cannot fix.
pub const FATAL_STARTUP: i32 = 3;
