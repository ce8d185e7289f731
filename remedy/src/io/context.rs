//! Cluster-context providers.
//!
//! A provider returns the live state text that is rendered into every step
//! prompt. How that text is gathered is up to the configured command.

use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::budget::Deadline;
use crate::core::text::truncate_chars;
use crate::core::types::IssueContext;
use crate::io::process::{command_from_argv, issue_env, run_command};

/// Source of the cluster-state snapshot refreshed every turn.
pub trait ContextProvider {
    /// Return at most `max_chars` characters describing the issue's live state.
    fn snapshot(&self, issue: &IssueContext, max_chars: usize) -> Result<String>;
}

/// Provider that always returns the same text.
#[derive(Debug, Clone, Default)]
pub struct StaticContextProvider {
    text: String,
}

impl StaticContextProvider {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl ContextProvider for StaticContextProvider {
    fn snapshot(&self, _issue: &IssueContext, max_chars: usize) -> Result<String> {
        Ok(truncate_chars(&self.text, max_chars))
    }
}

/// Provider that runs `[context].command` and captures its stdout.
#[derive(Debug, Clone)]
pub struct CommandContextProvider {
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl ContextProvider for CommandContextProvider {
    #[instrument(skip_all, fields(issue = %issue.issue_name, max_chars))]
    fn snapshot(&self, issue: &IssueContext, max_chars: usize) -> Result<String> {
        let mut cmd = command_from_argv(&self.argv)?;
        cmd.envs(issue_env(issue));
        let deadline = Deadline::after(self.timeout);
        let output = run_command(cmd, None, &deadline, self.output_limit_bytes)?;

        if let Some(reason) = output.interrupted {
            warn!(%reason, "context command interrupted");
            return Err(anyhow!("context command interrupted: {reason}"));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "context command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text()
            ));
        }
        let text = output.stdout_text();
        debug!(chars = text.chars().count(), "context snapshot captured");
        Ok(truncate_chars(text.trim_end(), max_chars))
    }
}
