//! Stable exit codes for the batch CLI.

/// Command succeeded; every unit it ran completed.
pub const OK: i32 = 0;
/// Invalid batch definition, base model or environment.
pub const INVALID: i32 = 1;
/// The batch ran to the end but at least one unit failed.
pub const UNIT_FAILURES: i32 = 2;
