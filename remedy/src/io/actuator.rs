//! Actuators apply one validated catalog action and report what happened.
//!
//! The returned text becomes the step's observation. Refusals that need live
//! cluster state (deleting the only pod of a workload, for one) are the
//! actuator's responsibility.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::budget::Deadline;
use crate::core::catalog::RemediationAction;
use crate::core::types::IssueContext;
use crate::io::process::{command_from_argv, issue_env, run_command};

/// One action to apply against the issue's resource.
#[derive(Debug, Clone)]
pub struct ActuationRequest<'a> {
    pub issue: &'a IssueContext,
    pub action: &'a RemediationAction,
    /// Wire-level params as proposed by the model.
    pub params: &'a BTreeMap<String, String>,
    pub deadline: Deadline,
}

pub trait Actuator {
    /// Apply the action and return the observation text.
    fn apply(&self, request: &ActuationRequest<'_>) -> Result<String>;
}

/// Actuator that only describes what it would do.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunActuator;

impl Actuator for DryRunActuator {
    fn apply(&self, request: &ActuationRequest<'_>) -> Result<String> {
        let observation = format!(
            "dry run: would apply {} ({}) to {} in namespace {}",
            request.action.kind(),
            render_params(request.params),
            request.issue.resource_label(),
            request.issue.namespace
        );
        info!(%observation, "dry-run actuation");
        Ok(observation)
    }
}

/// Actuator that runs `[actuator].command <Action>`.
///
/// The exact params are passed as a JSON object in `REMEDY_PARAMS`, and each
/// one also as `REMEDY_PARAM_<KEY>` unless two keys map to the same name. The
/// target resource arrives as `REMEDY_NAMESPACE`, `REMEDY_RESOURCE_KIND` and
/// `REMEDY_RESOURCE_NAME`.
#[derive(Debug, Clone)]
pub struct CommandActuator {
    pub argv: Vec<String>,
    pub output_limit_bytes: usize,
}

impl Actuator for CommandActuator {
    #[instrument(skip_all, fields(action = %request.action.kind(), issue = %request.issue.issue_name))]
    fn apply(&self, request: &ActuationRequest<'_>) -> Result<String> {
        let mut cmd = command_from_argv(&self.argv)?;
        cmd.arg(request.action.kind().as_str());
        cmd.envs(issue_env(request.issue));
        cmd.envs(param_env(request.params)?);

        let output = run_command(cmd, None, &request.deadline, self.output_limit_bytes)?;
        if let Some(reason) = output.interrupted {
            return Err(anyhow!("actuator interrupted: {reason}"));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "actuator command failed");
            return Err(anyhow!(
                "actuator exited with status {:?}: {}",
                output.status.code(),
                output.stderr_text()
            ));
        }
        Ok(output.stdout_text().trim_end().to_string())
    }
}

/// Name of the environment variable holding all params as JSON.
pub const PARAMS_ENV: &str = "REMEDY_PARAMS";

/// Environment for a param map: `REMEDY_PARAMS` plus per-key convenience vars.
///
/// Keys whose normalized names collide (`log.level`, `log_level`) get no
/// per-key var; they are only reachable through `REMEDY_PARAMS`.
pub fn param_env(params: &BTreeMap<String, String>) -> Result<Vec<(String, String)>> {
    let mut by_name: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (key, value) in params {
        by_name
            .entry(param_env_name(key))
            .or_default()
            .push(value.as_str());
    }

    let mut env = vec![(
        PARAMS_ENV.to_string(),
        serde_json::to_string(params).context("serialize actuator params")?,
    )];
    for (name, values) in by_name {
        match values.as_slice() {
            [value] => env.push((name, (*value).to_string())),
            _ => warn!(%name, "param keys collide, only passed via {PARAMS_ENV}"),
        }
    }
    Ok(env)
}

/// `memory_limit` becomes `REMEDY_PARAM_MEMORY_LIMIT`.
pub fn param_env_name(key: &str) -> String {
    let normalized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("REMEDY_PARAM_{normalized}")
}

/// Render params as `k=v, k=v` in key order.
pub fn render_params(params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return "no params".to_string();
    }
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{proposal, sample_issue};
    use std::time::Duration;

    #[test]
    fn param_names_are_env_safe() {
        assert_eq!(param_env_name("memory_limit"), "REMEDY_PARAM_MEMORY_LIMIT");
        assert_eq!(param_env_name("toRevision"), "REMEDY_PARAM_TOREVISION");
        assert_eq!(param_env_name("log.level"), "REMEDY_PARAM_LOG_LEVEL");
    }

    #[test]
    fn colliding_param_keys_stay_exact_in_json() {
        let params: BTreeMap<String, String> = [
            ("configmap", "api"),
            ("log.level", "debug"),
            ("log_level", "info"),
            ("featureFlag", "on"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let env: BTreeMap<String, String> = param_env(&params).expect("env").into_iter().collect();

        let exact: BTreeMap<String, String> =
            serde_json::from_str(&env[PARAMS_ENV]).expect("params json");
        assert_eq!(exact, params);
        assert_eq!(env["REMEDY_PARAM_CONFIGMAP"], "api");
        assert_eq!(env["REMEDY_PARAM_FEATUREFLAG"], "on");
        assert!(!env.contains_key("REMEDY_PARAM_LOG_LEVEL"));
    }

    #[test]
    fn dry_run_describes_action() {
        let issue = sample_issue();
        let proposed = proposal("ScaleDeployment", &[("replicas", "3")]);
        let action = RemediationAction::from_proposal(&proposed).expect("valid");
        let request = ActuationRequest {
            issue: &issue,
            action: &action,
            params: &proposed.params,
            deadline: Deadline::after(Duration::from_secs(1)),
        };
        let observation = DryRunActuator.apply(&request).expect("apply");
        assert!(observation.contains("ScaleDeployment"));
        assert!(observation.contains("replicas=3"));
    }

    #[cfg(unix)]
    #[test]
    fn command_actuator_passes_action_and_params() {
        let actuator = CommandActuator {
            argv: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo \"$0 replicas=$REMEDY_PARAM_REPLICAS ns=$REMEDY_NAMESPACE\"".to_string(),
            ],
            output_limit_bytes: 10_000,
        };
        let issue = sample_issue();
        let proposed = proposal("ScaleDeployment", &[("replicas", "4")]);
        let action = RemediationAction::from_proposal(&proposed).expect("valid");
        let request = ActuationRequest {
            issue: &issue,
            action: &action,
            params: &proposed.params,
            deadline: Deadline::after(Duration::from_secs(10)),
        };
        let observation = actuator.apply(&request).expect("apply");
        assert_eq!(
            observation,
            format!("ScaleDeployment replicas=4 ns={}", issue.namespace)
        );
    }

    #[cfg(unix)]
    #[test]
    fn command_actuator_receives_exact_patch_keys() {
        let actuator = CommandActuator {
            argv: vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf '%s|%s' \"$REMEDY_PARAMS\" \"${REMEDY_PARAM_LOG_LEVEL-unset}\"".to_string(),
            ],
            output_limit_bytes: 10_000,
        };
        let issue = sample_issue();
        let proposed = proposal(
            "PatchConfig",
            &[("configmap", "api"), ("log.level", "debug"), ("log_level", "info")],
        );
        let action = RemediationAction::from_proposal(&proposed).expect("valid");
        let request = ActuationRequest {
            issue: &issue,
            action: &action,
            params: &proposed.params,
            deadline: Deadline::after(Duration::from_secs(10)),
        };
        let observation = actuator.apply(&request).expect("apply");
        let (json, per_key) = observation.split_once('|').expect("separator");
        let exact: BTreeMap<String, String> = serde_json::from_str(json).expect("params json");
        assert_eq!(exact["log.level"], "debug");
        assert_eq!(exact["log_level"], "info");
        assert_eq!(per_key, "unset");
    }
}
