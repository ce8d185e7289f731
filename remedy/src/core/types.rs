//! Shared deterministic types for the remediation decision protocol.
//!
//! These types are the wire contract between the engine, the reasoning model
//! and RPC callers. They must not depend on external state or I/O.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Highest accepted [`IssueContext::risk_score`].
pub const MAX_RISK_SCORE: u8 = 100;

/// Facts describing one incident and the environment it lives in.
///
/// Immutable per engine call. Between turns the caller derives a fresh value
/// with [`IssueContext::with_cluster_context`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueContext {
    pub issue_name: String,
    pub namespace: String,
    pub resource_kind: String,
    pub resource_name: String,
    pub signal_type: String,
    pub severity: String,
    pub description: String,
    pub risk_score: u8,
    /// Live cluster state text produced by an external context provider.
    pub cluster_context: Option<String>,
    /// Description of earlier failed remediation attempts.
    pub previous_failure_context: Option<String>,
}

impl IssueContext {
    /// Reject issues without identity or with an out-of-range risk score.
    pub fn validate(&self) -> Result<()> {
        if self.issue_name.trim().is_empty() {
            bail!("missing issue identity: issue_name must be non-empty");
        }
        if self.risk_score > MAX_RISK_SCORE {
            bail!(
                "risk_score must be within 0..={MAX_RISK_SCORE} (got {})",
                self.risk_score
            );
        }
        Ok(())
    }

    /// Return a copy carrying a refreshed cluster snapshot.
    pub fn with_cluster_context(&self, snapshot: impl Into<String>) -> Self {
        let snapshot = snapshot.into();
        Self {
            cluster_context: (!snapshot.trim().is_empty()).then_some(snapshot),
            ..self.clone()
        }
    }

    /// `Kind/name` label used in prompts and logs.
    pub fn resource_label(&self) -> String {
        format!("{}/{}", self.resource_kind, self.resource_name)
    }
}

/// One completed turn of the control loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationStep {
    /// 1-based, monotonically increasing.
    pub step_number: u32,
    pub ai_reasoning: String,
    /// Catalog action name; `None` for observation-only turns.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "string_params")]
    pub params: BTreeMap<String, String>,
    /// Actuator result; absent when nothing was executed.
    #[serde(default)]
    pub observation: Option<String>,
}

/// An action proposed by the reasoning model, in wire form.
///
/// `action` stays a plain string so unknown names survive deserialization and
/// can be reported instead of rejected by serde.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAction {
    #[serde(default)]
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "string_params")]
    pub params: BTreeMap<String, String>,
}

/// The single decision produced by one agentic step.
///
/// Invariant: `resolved == true` implies `next_action.is_none()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDecision {
    pub reasoning: String,
    pub resolved: bool,
    #[serde(default)]
    pub next_action: Option<ProposedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postmortem_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub lessons_learned: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub prevention_actions: Vec<String>,
}

impl StepDecision {
    /// True when the model asked to wait for the next context refresh.
    pub fn is_observe(&self) -> bool {
        if self.resolved {
            return false;
        }
        match &self.next_action {
            None => true,
            Some(action) => action.action == "Observe",
        }
    }

    /// The action to execute this turn, if any.
    pub fn actionable(&self) -> Option<&ProposedAction> {
        if self.is_observe() {
            return None;
        }
        self.next_action.as_ref()
    }
}

/// Closure record synthesized from a resolved decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostmortemRecord {
    pub summary: String,
    pub root_cause: String,
    pub impact: String,
    pub lessons_learned: Vec<String>,
    pub prevention_actions: Vec<String>,
}

/// Result of the single-shot analysis call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub analysis: String,
    pub recommendation: String,
    /// Clamped to `[0.0, 1.0]` by the parser.
    pub confidence: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub suggested_actions: Vec<ProposedAction>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept `{"replicas": 3}` as well as `{"replicas": "3"}`; models are sloppy
/// about quoting numbers.
fn string_params<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "param '{key}' must be a string, got {other}"
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}
