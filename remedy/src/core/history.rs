//! Append-only turn history for one issue.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::types::RemediationStep;

/// Ordered record of every turn taken on one issue.
///
/// Never mutated in place: [`StepHistory::appended`] returns a new history so
/// each engine call can be handed an immutable snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepHistory {
    steps: Vec<RemediationStep>,
}

impl StepHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from deserialized steps, rejecting bad numbering.
    pub fn from_steps(steps: Vec<RemediationStep>) -> Result<Self> {
        let history = Self { steps };
        let errors = history.violations();
        if !errors.is_empty() {
            bail!("invalid step history:\n- {}", errors.join("\n- "));
        }
        Ok(history)
    }

    pub fn steps(&self) -> &[RemediationStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&RemediationStep> {
        self.steps.last()
    }

    /// Step number the next engine call must use.
    pub fn next_step_number(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    /// Return a new history with `step` appended.
    pub fn appended(&self, step: RemediationStep) -> Result<Self> {
        let expected = self.next_step_number();
        if step.step_number != expected {
            bail!(
                "out-of-order step: expected step {expected}, got {}",
                step.step_number
            );
        }
        let mut steps = self.steps.clone();
        steps.push(step);
        Ok(Self { steps })
    }

    /// Report numbering violations (steps must be exactly `1..=n`).
    pub fn violations(&self) -> Vec<String> {
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(idx, step)| {
                let expected = idx as u32 + 1;
                (step.step_number != expected).then(|| {
                    format!(
                        "step at position {idx} has step_number {} (expected {expected})",
                        step.step_number
                    )
                })
            })
            .collect()
    }
}
