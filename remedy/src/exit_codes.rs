//! Stable exit codes for remedy CLI commands.

/// Command succeeded, or the incident was resolved.
pub const OK: i32 = 0;
/// Invalid input, config or arguments, or any other error.
pub const INVALID: i32 = 1;
/// The run escalated to a human (budget exhausted or model unavailable).
pub const ESCALATED: i32 = 2;
/// The model response could not be parsed into a decision.
pub const UNPARSEABLE: i32 = 3;
