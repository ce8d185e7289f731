//! Agentic incident-remediation CLI.
//!
//! Renders remediation prompts, asks the configured reasoning model for one
//! decision at a time and drives the full loop against the configured
//! actuator. State lives under `.remedy/` in the current directory.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use remedy::core::budget::Deadline;
use remedy::core::catalog::{CATALOG, CATALOG_VERSION};
use remedy::core::parser::Parsed;
use remedy::core::types::IssueContext;
use remedy::engine::{self, EngineSettings, StepRequest};
use remedy::exit_codes;
use remedy::io::actuator::{Actuator, CommandActuator, DryRunActuator};
use remedy::io::config::{RemedyConfig, load_config};
use remedy::io::context::{CommandContextProvider, ContextProvider, StaticContextProvider};
use remedy::io::init::{InitOptions, RemedyPaths, init_remedy};
use remedy::io::issue_file::{load_history, load_issue};
use remedy::io::model::CommandModel;
use remedy::io::prompt::{PromptBuilder, StepPromptInput};
use remedy::io::transcript::{
    ESCALATION_FILE, POSTMORTEM_FILE, TurnMeta, TurnWriteRequest, prompt_digest,
    write_issue_artifact, write_turn,
};
use remedy::logging;
use remedy::looping::{
    EscalationReason, LoopStop, RemediationOptions, TurnReport, run_remediation,
};

#[derive(Parser)]
#[command(
    name = "remedy",
    version,
    about = "Agentic incident remediation, one model decision at a time"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.remedy/` with a default config and an example issue.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the remediation action catalog.
    Catalog {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Render a prompt without calling the model.
    Prompt {
        #[command(flatten)]
        turn: TurnArgs,
        /// Render the single-shot analysis prompt instead.
        #[arg(long)]
        analyze: bool,
    },
    /// Ask the model for exactly one decision and print it as JSON.
    Step {
        #[command(flatten)]
        turn: TurnArgs,
    },
    /// Ask the model for a single-shot analysis and print it as JSON.
    Analyze {
        /// Issue file (TOML or JSON).
        #[arg(long)]
        issue: PathBuf,
    },
    /// Drive the remediation loop until resolved or escalated.
    Run {
        /// Issue file (TOML or JSON).
        #[arg(long)]
        issue: PathBuf,
        /// Override `max_steps` from config.
        #[arg(long)]
        max_steps: Option<u32>,
        /// Describe actions instead of executing them.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(clap::Args)]
struct TurnArgs {
    /// Issue file (TOML or JSON).
    #[arg(long)]
    issue: PathBuf,
    /// JSON array of previous steps.
    #[arg(long)]
    history: Option<PathBuf>,
    /// Step number; defaults to the step after the history.
    #[arg(long)]
    step: Option<u32>,
    /// Override `max_steps` from config.
    #[arg(long)]
    max_steps: Option<u32>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = RemedyPaths::new(".");
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::Catalog { json } => cmd_catalog(json),
        Command::Prompt { turn, analyze } => cmd_prompt(&paths, &turn, analyze),
        Command::Step { turn } => cmd_step(&paths, &turn),
        Command::Analyze { issue } => cmd_analyze(&paths, &issue),
        Command::Run {
            issue,
            max_steps,
            dry_run,
        } => cmd_run(&paths, &issue, max_steps, dry_run),
    }
}

fn cmd_init(paths: &RemedyPaths, force: bool) -> Result<i32> {
    let paths = init_remedy(&paths.root, &InitOptions { force })?;
    println!("initialized {}", paths.remedy_dir.display());
    Ok(exit_codes::OK)
}

#[derive(Serialize)]
struct CatalogDoc {
    version: &'static str,
    actions: &'static [remedy::core::catalog::ActionSpec],
}

fn cmd_catalog(json: bool) -> Result<i32> {
    if json {
        let doc = CatalogDoc {
            version: CATALOG_VERSION,
            actions: &CATALOG,
        };
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(exit_codes::OK);
    }
    println!("action catalog {CATALOG_VERSION}");
    for spec in &CATALOG {
        let mode = if spec.kind.is_mutating() { "" } else { " (read-only)" };
        println!("\n{}{mode}: {}", spec.kind, spec.summary);
        for param in spec.params {
            let required = if param.required { "required" } else { "optional" };
            println!("  {} ({required}): {}", param.key, param.description);
        }
        println!("  {}", spec.guidance);
    }
    Ok(exit_codes::OK)
}

fn cmd_prompt(paths: &RemedyPaths, turn: &TurnArgs, analyze: bool) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let issue = load_issue(&turn.issue)?;
    let builder = PromptBuilder::new(cfg.prompt_limits());
    let prompt = if analyze {
        builder.build_analysis(&issue)?
    } else {
        let history = load_history(turn.history.as_deref())?;
        builder.build_step(&StepPromptInput {
            issue: &issue,
            history: &history,
            step_number: turn.step.unwrap_or_else(|| history.next_step_number()),
            max_steps: turn.max_steps.unwrap_or(cfg.max_steps),
        })?
    };
    print!("{prompt}");
    Ok(exit_codes::OK)
}

fn cmd_step(paths: &RemedyPaths, turn: &TurnArgs) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let issue = load_issue(&turn.issue)?;
    let history = load_history(turn.history.as_deref())?;
    let model = command_model(&cfg);
    let request = StepRequest {
        issue: &issue,
        history: &history,
        step_number: turn.step.unwrap_or_else(|| history.next_step_number()),
        max_steps: turn.max_steps.unwrap_or(cfg.max_steps),
    };
    let deadline = Deadline::after(cfg.step_timeout());
    let parsed = engine::step(&model, &EngineSettings::from_config(&cfg), &request, &deadline)
        .context("remedy step")?;
    print_parsed(&parsed)
}

fn cmd_analyze(paths: &RemedyPaths, issue_path: &Path) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let issue = load_issue(issue_path)?;
    let model = command_model(&cfg);
    let deadline = Deadline::after(cfg.analyze_timeout());
    let settings = EngineSettings::from_config(&cfg);
    let parsed = engine::analyze_issue(&model, &settings, &issue, &deadline)
        .context("remedy analyze")?;
    print_parsed(&parsed)
}

/// Print the value (or its sentinel) as JSON; a parse failure also goes to stderr.
fn print_parsed<T>(parsed: &Parsed<T>) -> Result<i32>
where
    T: remedy::core::parser::Fallback + Clone + Serialize,
{
    println!("{}", serde_json::to_string_pretty(&parsed.to_value())?);
    match parsed.failure() {
        Some(failure) => {
            eprintln!("{}", failure.diagnostic());
            Ok(exit_codes::UNPARSEABLE)
        }
        None => Ok(exit_codes::OK),
    }
}

fn cmd_run(
    paths: &RemedyPaths,
    issue_path: &Path,
    max_steps: Option<u32>,
    dry_run: bool,
) -> Result<i32> {
    let mut cfg = load_config(&paths.config_path)?;
    if let Some(max_steps) = max_steps {
        cfg.max_steps = max_steps;
    }
    if dry_run {
        cfg.actuator.dry_run = true;
    }
    cfg.validate()?;
    let issue = load_issue(issue_path)?;
    let issue_dir = paths.issue_dir(&issue.issue_name);

    let model = command_model(&cfg);
    let context = context_provider(&cfg, &issue);
    let actuator = actuator(&cfg)?;
    let options = RemediationOptions::from_config(&cfg);

    let mut transcript_error = None;
    let outcome = run_remediation(
        &model,
        context.as_ref(),
        actuator.as_ref(),
        &issue,
        &options,
        |turn| {
            if transcript_error.is_some() {
                return;
            }
            if let Err(err) = write_transcript(&issue_dir, turn) {
                transcript_error = Some(err);
            }
        },
    )?;
    if let Some(err) = transcript_error {
        return Err(err.context("write turn transcript"));
    }

    match &outcome.stop {
        LoopStop::Resolved { postmortem, .. } => {
            let path = write_issue_artifact(&issue_dir, POSTMORTEM_FILE, postmortem)?;
            println!(
                "resolved {} after {} step(s): {}",
                outcome.issue_name, outcome.steps_executed, postmortem.summary
            );
            println!("postmortem: {}", path.display());
            Ok(exit_codes::OK)
        }
        LoopStop::Escalated(escalation) => {
            let path = write_issue_artifact(&issue_dir, ESCALATION_FILE, escalation)?;
            eprintln!(
                "escalated {} after {} step(s): {}",
                outcome.issue_name,
                outcome.steps_executed,
                describe_reason(&escalation.reason)
            );
            eprintln!("escalation: {}", path.display());
            match escalation.reason {
                EscalationReason::UnparseableResponse { .. } => Ok(exit_codes::UNPARSEABLE),
                _ => Ok(exit_codes::ESCALATED),
            }
        }
    }
}

fn describe_reason(reason: &EscalationReason) -> String {
    match reason {
        EscalationReason::BudgetExhausted { max_steps } => {
            format!("step budget of {max_steps} exhausted")
        }
        EscalationReason::UnparseableResponse { cause } => {
            format!("unparseable response ({cause})")
        }
        EscalationReason::ModelUnavailable { error } => format!("model unavailable ({error})"),
    }
}

fn write_transcript(issue_dir: &Path, turn: &TurnReport<'_>) -> Result<()> {
    let meta = TurnMeta {
        issue: turn.issue.issue_name.clone(),
        step: turn.step_number,
        max_steps: turn.max_steps,
        outcome: turn.outcome,
        action: turn.step.and_then(|step| step.action.clone()),
        started_at: TurnMeta::timestamp(turn.started_at),
        duration_ms: u64::try_from(turn.duration.as_millis()).unwrap_or(u64::MAX),
        prompt_sha256: prompt_digest(&turn.trace.prompt),
        prompt_bytes: turn.trace.prompt.len(),
        parse_failure: turn.trace.parsed.failure().cloned(),
    };
    write_turn(&TurnWriteRequest {
        issue_dir,
        meta: &meta,
        prompt: &turn.trace.prompt,
        raw_response: &turn.trace.raw_response,
        decision: &turn.trace.parsed.to_value(),
    })?;
    Ok(())
}

fn command_model(cfg: &RemedyConfig) -> CommandModel {
    CommandModel::new(cfg.model.command.clone(), cfg.model.output_limit_bytes)
}

/// `[context].command` when set; otherwise the issue file's own snapshot.
fn context_provider(cfg: &RemedyConfig, issue: &IssueContext) -> Box<dyn ContextProvider> {
    match &cfg.context.command {
        Some(argv) => Box::new(CommandContextProvider {
            argv: argv.clone(),
            timeout: cfg.context_timeout(),
            output_limit_bytes: cfg.model.output_limit_bytes,
        }),
        None => Box::new(StaticContextProvider::new(
            issue.cluster_context.clone().unwrap_or_default(),
        )),
    }
}

fn actuator(cfg: &RemedyConfig) -> Result<Box<dyn Actuator>> {
    if cfg.actuator.dry_run {
        return Ok(Box::new(DryRunActuator));
    }
    let argv = cfg
        .actuator
        .command
        .clone()
        .context("actuator.command is required when actuator.dry_run = false")?;
    Ok(Box::new(CommandActuator {
        argv,
        output_limit_bytes: cfg.model.output_limit_bytes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["remedy", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
    }

    #[test]
    fn parse_step_with_history() {
        let cli = Cli::parse_from([
            "remedy",
            "step",
            "--issue",
            "issue.toml",
            "--history",
            "history.json",
            "--step",
            "2",
        ]);
        match cli.command {
            Command::Step { turn } => {
                assert_eq!(turn.issue, PathBuf::from("issue.toml"));
                assert_eq!(turn.history, Some(PathBuf::from("history.json")));
                assert_eq!(turn.step, Some(2));
                assert_eq!(turn.max_steps, None);
            }
            _ => panic!("expected step"),
        }
    }

    #[test]
    fn parse_run_dry_run() {
        let cli = Cli::parse_from(["remedy", "run", "--issue", "i.json", "--dry-run"]);
        assert!(matches!(
            cli.command,
            Command::Run {
                dry_run: true,
                max_steps: None,
                ..
            }
        ));
    }

    #[test]
    fn live_actuator_requires_command() {
        let mut cfg = RemedyConfig::default();
        cfg.actuator.dry_run = false;
        assert!(actuator(&cfg).is_err());
    }
}
