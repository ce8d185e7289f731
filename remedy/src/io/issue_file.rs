//! Loading issue and history files for CLI commands.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::history::StepHistory;
use crate::core::types::{IssueContext, RemediationStep};

/// Load an issue from TOML (`.toml`) or JSON (anything else).
pub fn load_issue(path: &Path) -> Result<IssueContext> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let issue: IssueContext = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    };
    issue
        .validate()
        .with_context(|| format!("invalid issue {}", path.display()))?;
    Ok(issue)
}

/// Load a JSON array of steps; a missing path means an empty history.
pub fn load_history(path: Option<&Path>) -> Result<StepHistory> {
    let Some(path) = path else {
        return Ok(StepHistory::new());
    };
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let steps: Vec<RemediationStep> =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    StepHistory::from_steps(steps).with_context(|| format!("invalid history {}", path.display()))
}
