//! The step engine: prompt, model call and parse composed into one decision.
//!
//! Every call is a pure function of its explicit inputs. The engine never
//! executes actions, sleeps, retries or enforces the step budget; the step
//! number only shapes the prompt. Model failures propagate as hard errors
//! and are never turned into decisions.

use thiserror::Error;
use tracing::{info, instrument};

use crate::core::budget::{Deadline, Interrupted};
use crate::core::history::StepHistory;
use crate::core::parser::{ParseOptions, Parsed, parse_analysis_response, parse_step_response};
use crate::core::types::{AnalysisResult, IssueContext, StepDecision};
use crate::io::config::RemedyConfig;
use crate::io::model::{ModelError, ModelRequest, ReasoningModel};
use crate::io::prompt::{PromptBuilder, PromptLimits, StepPromptInput};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("call cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    Model(ModelError),
    #[error("render prompt: {0:#}")]
    Prompt(anyhow::Error),
}

impl From<ModelError> for EngineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Cancelled => EngineError::Cancelled,
            ModelError::Timeout => EngineError::DeadlineExceeded,
            other => EngineError::Model(other),
        }
    }
}

impl From<Interrupted> for EngineError {
    fn from(reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => EngineError::Cancelled,
            Interrupted::DeadlineExceeded => EngineError::DeadlineExceeded,
        }
    }
}

/// Prompt and parse settings shared by every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub prompt: PromptLimits,
    pub parse: ParseOptions,
}

impl EngineSettings {
    pub fn from_config(cfg: &RemedyConfig) -> Self {
        Self {
            prompt: cfg.prompt_limits(),
            parse: ParseOptions {
                validate_actions: cfg.validate_actions,
            },
        }
    }
}

/// Inputs of one agentic step.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub issue: &'a IssueContext,
    pub history: &'a StepHistory,
    pub step_number: u32,
    pub max_steps: u32,
}

impl StepRequest<'_> {
    /// Reject malformed calls before anything reaches the model.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.issue
            .validate()
            .map_err(|e| EngineError::InvalidArgument(format!("{e:#}")))?;
        if self.step_number < 1 {
            return Err(EngineError::InvalidArgument(
                "step_number must be >= 1".to_string(),
            ));
        }
        if self.max_steps < 1 {
            return Err(EngineError::InvalidArgument(
                "max_steps must be >= 1".to_string(),
            ));
        }
        let violations = self.history.violations();
        if !violations.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "invalid step history: {}",
                violations.join("; ")
            )));
        }
        let expected = self.history.next_step_number();
        if self.step_number != expected {
            return Err(EngineError::InvalidArgument(format!(
                "out-of-order step: history has {} steps so step_number must be {expected}, got {}",
                self.history.len(),
                self.step_number
            )));
        }
        Ok(())
    }
}

/// Everything one step produced, for auditing.
#[derive(Debug, Clone)]
pub struct StepTrace {
    pub prompt: String,
    pub raw_response: String,
    pub parsed: Parsed<StepDecision>,
}

/// Produce exactly one decision for the given issue, history and step.
pub fn step<M: ReasoningModel + ?Sized>(
    model: &M,
    settings: &EngineSettings,
    request: &StepRequest<'_>,
    deadline: &Deadline,
) -> Result<Parsed<StepDecision>, EngineError> {
    step_traced(model, settings, request, deadline).map(|trace| trace.parsed)
}

/// Like [`step`], also returning the prompt and the raw response.
#[instrument(skip_all, fields(issue = %request.issue.issue_name, step = request.step_number, max_steps = request.max_steps))]
pub fn step_traced<M: ReasoningModel + ?Sized>(
    model: &M,
    settings: &EngineSettings,
    request: &StepRequest<'_>,
    deadline: &Deadline,
) -> Result<StepTrace, EngineError> {
    request.validate()?;
    let prompt = PromptBuilder::new(settings.prompt)
        .build_step(&StepPromptInput {
            issue: request.issue,
            history: request.history,
            step_number: request.step_number,
            max_steps: request.max_steps,
        })
        .map_err(EngineError::Prompt)?;

    deadline.remaining()?;
    let model_request =
        ModelRequest::new(prompt.clone(), deadline.clone()).for_issue(request.issue);
    let raw_response = model.complete(&model_request)?;
    let parsed = parse_step_response(&raw_response, &settings.parse);
    info!(
        parsed = !parsed.is_failure(),
        response_bytes = raw_response.len(),
        "step decided"
    );
    Ok(StepTrace {
        prompt,
        raw_response,
        parsed,
    })
}

/// Single-shot analysis: one recommendation, confidence and suggested actions.
#[instrument(skip_all, fields(issue = %issue.issue_name))]
pub fn analyze_issue<M: ReasoningModel + ?Sized>(
    model: &M,
    settings: &EngineSettings,
    issue: &IssueContext,
    deadline: &Deadline,
) -> Result<Parsed<AnalysisResult>, EngineError> {
    issue
        .validate()
        .map_err(|e| EngineError::InvalidArgument(format!("{e:#}")))?;
    let prompt = PromptBuilder::new(settings.prompt)
        .build_analysis(issue)
        .map_err(EngineError::Prompt)?;

    deadline.remaining()?;
    let model_request = ModelRequest::new(prompt, deadline.clone()).for_issue(issue);
    let raw_response = model.complete(&model_request)?;
    Ok(parse_analysis_response(&raw_response, &settings.parse))
}
