//! Deterministic, pure logic of the remediation decision protocol.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod catalog;
pub mod hints;
pub mod history;
pub mod parser;
pub mod postmortem;
pub mod text;
pub mod types;
