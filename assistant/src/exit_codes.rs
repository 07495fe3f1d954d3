//! Stable exit codes for assistant CLI commands.
//!
//! `assistant run` exits with the child's own exit code when the command ran
//! to completion; the codes below cover everything else.

/// Command succeeded, or `check` allowed the command.
pub const OK: i32 = 0;
/// Invalid arguments, configuration or other errors.
pub const INVALID: i32 = 1;
/// The connection ended in `Failed` (reconnects exhausted or credentials rejected).
pub const CONNECTION_FAILED: i32 = 2;
/// The command was denied by policy or declined by the user.
pub const DENIED: i32 = 3;
/// `check` only: the command needs user confirmation.
pub const NEEDS_CONFIRMATION: i32 = 4;
/// The command was killed by a signal and has no exit code of its own.
pub const SIGNALED: i32 = 125;
/// The command exceeded its time limit (same value as coreutils `timeout`).
pub const TIMEOUT: i32 = 124;
