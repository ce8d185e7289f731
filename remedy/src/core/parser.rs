//! Tolerant parsing of reasoning-model output.
//!
//! Parsing never fails with an error or panics. Anything that does not decode
//! into a well-formed decision becomes a [`Parsed::Failure`] that keeps the
//! raw text and the cause, so callers cannot mistake a fallback for a genuine
//! model decision without checking.
//!
//! Stages: strip one markdown fence, parse JSON, validate against the embedded
//! JSON Schema (Draft 2020-12), deserialize, then check semantic invariants.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::catalog::{ActionKind, CATALOG_VERSION};
use crate::core::text::truncate_chars;
use crate::core::types::{AnalysisResult, StepDecision};

const STEP_DECISION_SCHEMA: &str = include_str!("../../schemas/step_decision.schema.json");
const ANALYSIS_SCHEMA: &str = include_str!("../../schemas/analysis.schema.json");

/// Upper bound on raw response text embedded in a diagnostic.
pub const MAX_RAW_CHARS: usize = 2000;

static STEP_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile_schema(STEP_DECISION_SCHEMA));
static ANALYSIS_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(ANALYSIS_SCHEMA));

fn compile_schema(raw: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect("embedded schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded schema should compile")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Reject action names outside the catalog.
    pub validate_actions: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            validate_actions: true,
        }
    }
}

/// Why a model response could not be turned into a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseFailureCause {
    #[error("invalid JSON: {message}")]
    InvalidJson { message: String },
    #[error("schema violation: {}", .errors.join("; "))]
    SchemaViolation { errors: Vec<String> },
    #[error("unexpected shape: {message}")]
    InvalidShape { message: String },
    #[error("resolved decision must not carry a next_action")]
    Contradiction,
    #[error("unknown action '{action}' (not in action catalog {CATALOG_VERSION})")]
    UnknownAction { action: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    pub raw: String,
    pub cause: ParseFailureCause,
}

impl ParseFailure {
    /// Human-readable diagnostic embedding the cause and the (bounded) raw text.
    pub fn diagnostic(&self) -> String {
        format!(
            "Failed to parse AI response: {}. Raw response: {}",
            self.cause,
            truncate_chars(&self.raw, MAX_RAW_CHARS)
        )
    }
}

/// Values that have a sentinel form standing in for an unparseable response.
pub trait Fallback {
    fn from_failure(failure: &ParseFailure) -> Self;
}

impl Fallback for StepDecision {
    fn from_failure(failure: &ParseFailure) -> Self {
        StepDecision {
            reasoning: failure.diagnostic(),
            resolved: false,
            next_action: None,
            ..StepDecision::default()
        }
    }
}

impl Fallback for AnalysisResult {
    fn from_failure(failure: &ParseFailure) -> Self {
        AnalysisResult {
            analysis: failure.diagnostic(),
            recommendation: "Escalate to a human operator: the analysis response could not be parsed."
                .to_string(),
            confidence: 0.0,
            suggested_actions: Vec::new(),
        }
    }
}

/// Outcome of parsing one model response.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Ok(T),
    Failure(ParseFailure),
}

impl<T> Parsed<T> {
    pub fn is_failure(&self) -> bool {
        matches!(self, Parsed::Failure(_))
    }

    pub fn failure(&self) -> Option<&ParseFailure> {
        match self {
            Parsed::Ok(_) => None,
            Parsed::Failure(failure) => Some(failure),
        }
    }
}

impl<T: Fallback + Clone> Parsed<T> {
    /// The parsed value, or the sentinel built from the failure.
    pub fn into_value(self) -> T {
        match self {
            Parsed::Ok(value) => value,
            Parsed::Failure(failure) => T::from_failure(&failure),
        }
    }

    pub fn to_value(&self) -> T {
        self.clone().into_value()
    }
}

/// Remove one surrounding triple-backtick fence (optionally tagged `json`).
///
/// Inner content is returned untouched apart from surrounding whitespace.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse an agentic-step response.
pub fn parse_step_response(raw: &str, options: &ParseOptions) -> Parsed<StepDecision> {
    let decision: StepDecision = match decode(raw, &STEP_VALIDATOR) {
        Ok(decision) => decision,
        Err(cause) => return failure(raw, cause),
    };

    if decision.resolved && decision.next_action.is_some() {
        return failure(raw, ParseFailureCause::Contradiction);
    }
    if options.validate_actions
        && let Some(action) = &decision.next_action
        && ActionKind::parse(&action.action).is_none()
    {
        return failure(
            raw,
            ParseFailureCause::UnknownAction {
                action: action.action.clone(),
            },
        );
    }

    debug!(
        resolved = decision.resolved,
        action = decision.next_action.as_ref().map(|a| a.action.as_str()),
        "parsed step decision"
    );
    Parsed::Ok(decision)
}

/// Parse a single-shot analysis response, clamping confidence to `[0, 1]`.
pub fn parse_analysis_response(raw: &str, options: &ParseOptions) -> Parsed<AnalysisResult> {
    let mut analysis: AnalysisResult = match decode(raw, &ANALYSIS_VALIDATOR) {
        Ok(analysis) => analysis,
        Err(cause) => return failure(raw, cause),
    };

    analysis.confidence = clamp_confidence(analysis.confidence);
    if options.validate_actions {
        analysis.suggested_actions.retain(|suggestion| {
            let known = ActionKind::parse(&suggestion.action).is_some();
            if !known {
                warn!(action = %suggestion.action, "dropping suggested action outside catalog");
            }
            known
        });
    }
    Parsed::Ok(analysis)
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

fn decode<T: DeserializeOwned>(raw: &str, validator: &Validator) -> Result<T, ParseFailureCause> {
    let body = strip_code_fence(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|err| ParseFailureCause::InvalidJson {
            message: err.to_string(),
        })?;
    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(ParseFailureCause::SchemaViolation { errors });
    }
    serde_json::from_value(value).map_err(|err| ParseFailureCause::InvalidShape {
        message: err.to_string(),
    })
}

fn failure<T>(raw: &str, cause: ParseFailureCause) -> Parsed<T> {
    warn!(%cause, raw_len = raw.len(), "unparseable model response");
    Parsed::Failure(ParseFailure {
        raw: raw.to_string(),
        cause,
    })
}
