//! Reasoning-model abstraction.
//!
//! The [`ReasoningModel`] trait decouples the step engine from the client
//! that actually talks to an LLM. [`CommandModel`] pipes the prompt into a
//! configured command-line client; tests use scripted models that return
//! predetermined responses without spawning processes.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{Deadline, Interrupted};
use crate::core::types::IssueContext;
use crate::io::process::{command_from_argv, issue_env, run_command};

/// One completion call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    pub deadline: Deadline,
    /// Extra environment for command-backed clients.
    pub env: Vec<(String, String)>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>, deadline: Deadline) -> Self {
        Self {
            prompt: prompt.into(),
            deadline,
            env: Vec::new(),
        }
    }

    pub fn for_issue(mut self, issue: &IssueContext) -> Self {
        self.env = issue_env(issue);
        self
    }
}

/// Hard failures of the model call. Never turned into a decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model call cancelled")]
    Cancelled,
    #[error("model call timed out")]
    Timeout,
    #[error("model transport error: {0}")]
    Transport(String),
    #[error("model authentication failed: {0}")]
    Auth(String),
    #[error("model rate limited: {0}")]
    RateLimited(String),
    #[error("model client exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
    #[error("model returned an empty response")]
    EmptyResponse,
}

impl From<Interrupted> for ModelError {
    fn from(reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => ModelError::Cancelled,
            Interrupted::DeadlineExceeded => ModelError::Timeout,
        }
    }
}

/// Abstraction over reasoning-model backends.
pub trait ReasoningModel: Send + Sync {
    /// Return the raw response text for `request.prompt`.
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

/// Model client that runs an external command, prompt on stdin, response on stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    pub argv: Vec<String>,
    pub output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(argv: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            output_limit_bytes,
        }
    }
}

impl ReasoningModel for CommandModel {
    #[instrument(skip_all, fields(program = self.argv.first().map(String::as_str), prompt_bytes = request.prompt.len()))]
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        request.deadline.remaining()?;
        let mut cmd =
            command_from_argv(&self.argv).map_err(|e| ModelError::Transport(format!("{e:#}")))?;
        cmd.envs(request.env.iter().map(|(k, v)| (k, v)));

        info!("invoking model command");
        let output = run_command(
            cmd,
            Some(request.prompt.as_bytes()),
            &request.deadline,
            self.output_limit_bytes,
        )
        .map_err(|e| ModelError::Transport(format!("{e:#}")))?;

        if let Some(reason) = output.interrupted {
            return Err(reason.into());
        }
        if !output.status.success() {
            let err = classify_failure(output.status.code(), &output.stderr_text());
            warn!(exit_code = ?output.status.code(), %err, "model command failed");
            return Err(err);
        }

        let response = output.stdout_text();
        if response.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        debug!(response_bytes = response.len(), "model responded");
        Ok(response)
    }
}

/// Map a failed client run to an error kind by inspecting its stderr.
pub fn classify_failure(status: Option<i32>, stderr: &str) -> ModelError {
    let lower = stderr.to_lowercase();
    let detail = if stderr.is_empty() {
        format!("exit status {status:?}")
    } else {
        stderr.to_string()
    };

    if ["rate limit", "rate_limit", "429", "too many requests", "quota"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return ModelError::RateLimited(detail);
    }
    if [
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "api key",
        "authentication",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
    {
        return ModelError::Auth(detail);
    }
    if status.is_none()
        || [
            "connection",
            "network",
            "dns",
            "unreachable",
            "timed out",
            "502",
            "503",
        ]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return ModelError::Transport(detail);
    }
    ModelError::Failed {
        status,
        stderr: stderr.to_string(),
    }
}
