//! Remedy configuration stored under `.remedy/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::prompt::PromptLimits;

/// Remedy configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemedyConfig {
    /// Step budget before a run escalates to a human.
    pub max_steps: u32,

    /// Wall-clock budget for one step's model call.
    pub step_timeout_secs: u64,

    /// Wall-clock budget for one analysis call.
    pub analyze_timeout_secs: u64,

    /// Pause after an observe-only turn before refreshing context.
    pub observe_interval_secs: u64,

    pub cluster_context_max_chars: usize,

    /// Each history observation is cut to this many characters in prompts.
    pub observation_max_chars: usize,

    pub prompt_budget_bytes: usize,

    /// Treat action names outside the catalog as unparseable responses.
    pub validate_actions: bool,

    pub model: ModelConfig,
    pub context: ContextConfig,
    pub actuator: ActuatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Client command; the prompt is written to its stdin (e.g. `["llm"]`).
    pub command: Vec<String>,
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Command printing the live cluster state; unset means the issue file's snapshot.
    pub command: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Command invoked as `<command...> <Action>` with params in the environment.
    pub command: Option<Vec<String>>,
    /// Describe actions instead of executing them.
    pub dry_run: bool,
    pub timeout_secs: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            command: None,
            dry_run: true,
            timeout_secs: 300,
        }
    }
}

impl Default for RemedyConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            step_timeout_secs: 120,
            analyze_timeout_secs: 60,
            observe_interval_secs: 15,
            cluster_context_max_chars: 12_000,
            observation_max_chars: 2_000,
            prompt_budget_bytes: 60_000,
            validate_actions: true,
            model: ModelConfig::default(),
            context: ContextConfig::default(),
            actuator: ActuatorConfig::default(),
        }
    }
}

impl RemedyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.analyze_timeout_secs == 0 {
            return Err(anyhow!("analyze_timeout_secs must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        check_command("model.command", Some(&self.model.command))?;
        check_command("context.command", self.context.command.as_ref())?;
        check_command("actuator.command", self.actuator.command.as_ref())?;
        if !self.actuator.dry_run && self.actuator.command.is_none() {
            return Err(anyhow!(
                "actuator.command is required when actuator.dry_run = false"
            ));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_secs(self.analyze_timeout_secs)
    }

    pub fn observe_interval(&self) -> Duration {
        Duration::from_secs(self.observe_interval_secs)
    }

    /// Context commands default to the step timeout.
    pub fn context_timeout(&self) -> Duration {
        Duration::from_secs(self.context.timeout_secs.unwrap_or(self.step_timeout_secs))
    }

    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_secs(self.actuator.timeout_secs)
    }

    pub fn prompt_limits(&self) -> PromptLimits {
        PromptLimits {
            budget_bytes: self.prompt_budget_bytes,
            cluster_context_max_chars: self.cluster_context_max_chars,
            observation_max_chars: self.observation_max_chars,
        }
    }
}

fn check_command(name: &str, command: Option<&Vec<String>>) -> Result<()> {
    match command {
        Some(argv) if argv.first().is_none_or(|program| program.trim().is_empty()) => {
            Err(anyhow!("{name} must be a non-empty array"))
        }
        _ => Ok(()),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RemedyConfig::default()`.
pub fn load_config(path: &Path) -> Result<RemedyConfig> {
    if !path.exists() {
        let cfg = RemedyConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RemedyConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RemedyConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
