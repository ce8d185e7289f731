//! Test-only helpers: sample issues, scripted models and recording actuators.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use anyhow::Result;
use serde_json::json;

use crate::core::types::{IssueContext, ProposedAction, RemediationStep};
use crate::io::actuator::{ActuationRequest, Actuator};
use crate::io::model::{ModelError, ModelRequest, ReasoningModel};

/// A deterministic OOM incident on a checkout deployment.
pub fn sample_issue() -> IssueContext {
    IssueContext {
        issue_name: "checkout-oom".to_string(),
        namespace: "shop".to_string(),
        resource_kind: "Deployment".to_string(),
        resource_name: "checkout".to_string(),
        signal_type: "PodRestarts".to_string(),
        severity: "high".to_string(),
        description: "checkout pods restart every few minutes".to_string(),
        risk_score: 40,
        cluster_context: None,
        previous_failure_context: None,
    }
}

/// An observation-only step.
pub fn observe_step(step_number: u32, reasoning: &str) -> RemediationStep {
    RemediationStep {
        step_number,
        ai_reasoning: reasoning.to_string(),
        action: None,
        params: BTreeMap::new(),
        observation: None,
    }
}

/// A proposal with the given action name and params.
pub fn proposal(action: &str, params: &[(&str, &str)]) -> ProposedAction {
    ProposedAction {
        name: format!("{action} proposal"),
        action: action.to_string(),
        description: format!("test {action}"),
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// Raw model response proposing `action`.
pub fn action_response(reasoning: &str, action: &str, params: &[(&str, &str)]) -> String {
    let params: BTreeMap<&str, &str> = params.iter().copied().collect();
    json!({
        "reasoning": reasoning,
        "resolved": false,
        "next_action": {
            "name": action,
            "action": action,
            "description": reasoning,
            "params": params,
        }
    })
    .to_string()
}

/// Raw model response asking to observe.
pub fn observe_response(reasoning: &str) -> String {
    json!({"reasoning": reasoning, "resolved": false, "next_action": null}).to_string()
}

/// Raw model response closing the incident with a full postmortem.
pub fn resolved_response(summary: &str) -> String {
    json!({
        "reasoning": "workload healthy",
        "resolved": true,
        "next_action": null,
        "postmortem_summary": summary,
        "root_cause": "memory limit below working set",
        "impact": "intermittent 502s",
        "lessons_learned": ["size memory from observed peaks"],
        "prevention_actions": ["alert at 90% of memory limit"],
    })
    .to_string()
}

/// Model that replays scripted results in order and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(responses: &[String]) -> Self {
        Self::new(responses.iter().cloned().map(Ok).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

impl ReasoningModel for ScriptedModel {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        request.deadline.remaining()?;
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(request.prompt.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Transport("scripted model exhausted".to_string())))
    }
}

/// One call seen by [`RecordingActuator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedAction {
    pub action: String,
    pub params: BTreeMap<String, String>,
}

/// Actuator that records calls and returns a fixed observation.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    applied: Mutex<Vec<AppliedAction>>,
    fail_with: Option<String>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn applied(&self) -> Vec<AppliedAction> {
        self.applied.lock().expect("applied lock").clone()
    }
}

impl Actuator for RecordingActuator {
    fn apply(&self, request: &ActuationRequest<'_>) -> Result<String> {
        let action = request.action.kind().as_str().to_string();
        self.applied.lock().expect("applied lock").push(AppliedAction {
            action: action.clone(),
            params: request.params.clone(),
        });
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        Ok(format!("applied {action}"))
    }
}
