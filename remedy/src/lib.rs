//! Agentic incident-remediation step engine.
//!
//! One engine call turns an incident, the turns taken so far and the step
//! budget into exactly one decision from a reasoning model. The crate is
//! split the same way the decision protocol is:
//!
//! - **[`core`]**: Pure, deterministic logic (types, history, action catalog,
//!   response parsing, postmortems, signal hints). No I/O.
//! - **[`io`]**: Side-effecting operations (prompt templates, config, model,
//!   context and actuator commands, transcripts). Isolated behind traits so
//!   tests can script them.
//!
//! [`engine`] composes prompt, model and parser into one step;
//! [`looping`] drives the full remediation loop on top of it.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
