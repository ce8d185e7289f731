//! I/O helpers: templates, config, adapter commands and transcripts.

pub mod actuator;
pub mod config;
pub mod context;
pub mod init;
pub mod issue_file;
pub mod model;
pub mod process;
pub mod prompt;
pub mod transcript;
