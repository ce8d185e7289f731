//! The remediation control loop behind `remedy run`.
//!
//! Each turn refreshes the cluster context, asks the engine for one decision,
//! validates and applies the proposed action, records the observation and
//! appends the step. The loop owns the step budget; the engine never does.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::budget::Deadline;
use crate::core::catalog::RemediationAction;
use crate::core::history::StepHistory;
use crate::core::parser::{ParseFailureCause, Parsed};
use crate::core::postmortem;
use crate::core::types::{IssueContext, PostmortemRecord, RemediationStep, StepDecision};
use crate::engine::{self, EngineError, EngineSettings, StepRequest, StepTrace};
use crate::io::actuator::{ActuationRequest, Actuator};
use crate::io::config::RemedyConfig;
use crate::io::context::ContextProvider;
use crate::io::model::ReasoningModel;
use crate::io::transcript::TurnOutcome;

/// Prefix of the observation recorded when the catalog refuses an action.
pub const REFUSED_PREFIX: &str = "refused by action catalog";

#[derive(Debug, Clone)]
pub struct RemediationOptions {
    pub max_steps: u32,
    pub step_timeout: Duration,
    pub actuator_timeout: Duration,
    pub observe_interval: Duration,
    pub cluster_context_max_chars: usize,
    pub settings: EngineSettings,
}

impl RemediationOptions {
    pub fn from_config(cfg: &RemedyConfig) -> Self {
        Self {
            max_steps: cfg.max_steps,
            step_timeout: cfg.step_timeout(),
            actuator_timeout: cfg.actuator_timeout(),
            observe_interval: cfg.observe_interval(),
            cluster_context_max_chars: cfg.cluster_context_max_chars,
            settings: EngineSettings::from_config(cfg),
        }
    }
}

/// Why a run was handed to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    BudgetExhausted { max_steps: u32 },
    UnparseableResponse { cause: ParseFailureCause },
    ModelUnavailable { error: String },
}

/// Everything a human needs to resume the incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Escalation {
    pub issue: String,
    pub reason: EscalationReason,
    pub last_reasoning: String,
    pub history: StepHistory,
}

/// Reason why `run_remediation` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    Resolved {
        decision: StepDecision,
        postmortem: PostmortemRecord,
    },
    Escalated(Escalation),
}

/// Summary of a remediation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationOutcome {
    pub issue_name: String,
    pub steps_executed: u32,
    pub history: StepHistory,
    pub stop: LoopStop,
}

/// One finished turn, handed to the `on_turn` callback.
#[derive(Debug)]
pub struct TurnReport<'a> {
    pub issue: &'a IssueContext,
    pub step_number: u32,
    pub max_steps: u32,
    pub trace: &'a StepTrace,
    pub outcome: TurnOutcome,
    /// The appended step; absent for resolved and unparseable turns.
    pub step: Option<&'a RemediationStep>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Drive the loop until the incident resolves or the run escalates.
///
/// Invalid input is an error. Model failures, unparseable responses and an
/// exhausted budget all end as [`LoopStop::Escalated`] with the full history.
#[instrument(skip_all, fields(issue = %issue.issue_name, max_steps = options.max_steps))]
pub fn run_remediation<M, C, A, F>(
    model: &M,
    context: &C,
    actuator: &A,
    issue: &IssueContext,
    options: &RemediationOptions,
    mut on_turn: F,
) -> Result<RemediationOutcome>
where
    M: ReasoningModel + ?Sized,
    C: ContextProvider + ?Sized,
    A: Actuator + ?Sized,
    F: FnMut(&TurnReport<'_>),
{
    issue.validate()?;
    if options.max_steps == 0 {
        return Err(anyhow!("max_steps must be > 0"));
    }

    let mut history = StepHistory::new();
    let mut steps_executed = 0u32;
    loop {
        let step_number = history.next_step_number();
        let current = refresh_context(context, issue, options.cluster_context_max_chars);
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = Deadline::after(options.step_timeout);

        let request = StepRequest {
            issue: &current,
            history: &history,
            step_number,
            max_steps: options.max_steps,
        };
        let trace = match engine::step_traced(model, &options.settings, &request, &deadline) {
            Ok(trace) => trace,
            Err(EngineError::InvalidArgument(msg)) => return Err(anyhow!(msg)),
            Err(err) => {
                warn!(step = step_number, %err, "model unavailable, escalating");
                let reason = EscalationReason::ModelUnavailable {
                    error: err.to_string(),
                };
                return Ok(escalate(issue, history, steps_executed, reason, None));
            }
        };

        let decision = match &trace.parsed {
            Parsed::Failure(failure) => {
                on_turn(&TurnReport {
                    issue: &current,
                    step_number,
                    max_steps: options.max_steps,
                    trace: &trace,
                    outcome: TurnOutcome::Unparseable,
                    step: None,
                    started_at,
                    duration: clock.elapsed(),
                });
                let reason = EscalationReason::UnparseableResponse {
                    cause: failure.cause.clone(),
                };
                let reasoning = trace.parsed.to_value().reasoning;
                return Ok(escalate(issue, history, steps_executed, reason, Some(reasoning)));
            }
            Parsed::Ok(decision) => decision.clone(),
        };

        if decision.resolved {
            on_turn(&TurnReport {
                issue: &current,
                step_number,
                max_steps: options.max_steps,
                trace: &trace,
                outcome: TurnOutcome::Resolved,
                step: None,
                started_at,
                duration: clock.elapsed(),
            });
            let postmortem = postmortem::synthesize(&decision).unwrap_or_default();
            info!(step = step_number, "incident resolved");
            return Ok(RemediationOutcome {
                issue_name: issue.issue_name.clone(),
                steps_executed,
                history,
                stop: LoopStop::Resolved {
                    decision,
                    postmortem,
                },
            });
        }

        let (step, outcome) = execute_turn(actuator, &current, &decision, step_number, options);
        history = history.appended(step)?;
        steps_executed += 1;
        on_turn(&TurnReport {
            issue: &current,
            step_number,
            max_steps: options.max_steps,
            trace: &trace,
            outcome,
            step: history.last(),
            started_at,
            duration: clock.elapsed(),
        });

        if step_number >= options.max_steps {
            warn!(steps = step_number, "step budget exhausted, escalating");
            let reason = EscalationReason::BudgetExhausted {
                max_steps: options.max_steps,
            };
            return Ok(escalate(issue, history, steps_executed, reason, None));
        }
        if outcome == TurnOutcome::Observed && !options.observe_interval.is_zero() {
            thread::sleep(options.observe_interval);
        }
    }
}

/// Apply the decision's action (if any) and build the step to record.
fn execute_turn<A: Actuator + ?Sized>(
    actuator: &A,
    issue: &IssueContext,
    decision: &StepDecision,
    step_number: u32,
    options: &RemediationOptions,
) -> (RemediationStep, TurnOutcome) {
    let mut step = RemediationStep {
        step_number,
        ai_reasoning: decision.reasoning.clone(),
        action: None,
        params: Default::default(),
        observation: None,
    };
    let Some(proposal) = decision.actionable() else {
        info!(step = step_number, "observing");
        return (step, TurnOutcome::Observed);
    };
    step.action = Some(proposal.action.clone());
    step.params = proposal.params.clone();

    let action = match RemediationAction::from_proposal(proposal) {
        Ok(action) => action,
        Err(violation) => {
            warn!(step = step_number, %violation, "action refused");
            step.observation = Some(format!("{REFUSED_PREFIX}: {violation}"));
            return (step, TurnOutcome::Refused);
        }
    };

    let request = ActuationRequest {
        issue,
        action: &action,
        params: &proposal.params,
        deadline: Deadline::after(options.actuator_timeout),
    };
    match actuator.apply(&request) {
        Ok(observation) => {
            info!(step = step_number, action = %action.kind(), "action applied");
            step.observation = Some(observation);
            (step, TurnOutcome::Acted)
        }
        Err(err) => {
            warn!(
                step = step_number,
                action = %action.kind(),
                err = %format!("{err:#}"),
                "actuation failed"
            );
            step.observation = Some(format!("actuation failed: {err:#}"));
            (step, TurnOutcome::ActuationFailed)
        }
    }
}

fn refresh_context<C: ContextProvider + ?Sized>(
    context: &C,
    issue: &IssueContext,
    max_chars: usize,
) -> IssueContext {
    match context.snapshot(issue, max_chars) {
        Ok(snapshot) => issue.with_cluster_context(snapshot),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "context refresh failed");
            issue.with_cluster_context(format!("(cluster context unavailable: {err:#})"))
        }
    }
}

fn escalate(
    issue: &IssueContext,
    history: StepHistory,
    steps_executed: u32,
    reason: EscalationReason,
    last_reasoning: Option<String>,
) -> RemediationOutcome {
    let last_reasoning = last_reasoning
        .or_else(|| history.last().map(|step| step.ai_reasoning.clone()))
        .unwrap_or_default();
    RemediationOutcome {
        issue_name: issue.issue_name.clone(),
        steps_executed,
        history: history.clone(),
        stop: LoopStop::Escalated(Escalation {
            issue: issue.issue_name.clone(),
            reason,
            last_reasoning,
            history,
        }),
    }
}
