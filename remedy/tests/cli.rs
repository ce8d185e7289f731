//! CLI tests for the `remedy` binary.
//!
//! Spawns the binary in a temp project and checks output and exit codes.
//! Model-backed commands use a shell script standing in for the model client.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use remedy::exit_codes;
use remedy::io::config::{RemedyConfig, write_config};
use remedy::io::init::{InitOptions, RemedyPaths, init_remedy};

fn remedy(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_remedy"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("spawn remedy")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn init_then_prompt_renders_example_issue() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = remedy(temp.path(), &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));

    let prompt = remedy(
        temp.path(),
        &["prompt", "--issue", ".remedy/issue.example.toml"],
    );
    assert_eq!(prompt.status.code(), Some(exit_codes::OK));
    let text = stdout(&prompt);
    assert!(text.contains("This is step 1 of at most 10."));
    assert!(text.contains("- Name: checkout-oom"));
    assert!(text.contains("No steps taken yet."));
}

#[test]
fn init_twice_without_force_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(remedy(temp.path(), &["init"]).status.code(), Some(exit_codes::OK));
    let again = remedy(temp.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));
}

#[test]
fn catalog_json_lists_every_action() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = remedy(temp.path(), &["catalog", "--json"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let doc: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("catalog json");
    assert_eq!(doc["version"], "v1");
    let kinds: Vec<&str> = doc["actions"]
        .as_array()
        .expect("actions")
        .iter()
        .filter_map(|a| a["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"AdjustResources"));
    assert!(kinds.contains(&"Observe"));
    assert_eq!(kinds.len(), 7);
}

#[test]
fn analyze_prompt_has_no_step_contract() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_remedy(temp.path(), &InitOptions { force: false }).expect("init");
    let output = remedy(
        temp.path(),
        &["prompt", "--issue", ".remedy/issue.example.toml", "--analyze"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    assert!(text.contains("### Analysis Contract"));
    assert!(!text.contains("### Step History"));
}

#[test]
fn missing_issue_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = remedy(temp.path(), &["prompt", "--issue", "nope.toml"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[cfg(unix)]
mod scripted_model {
    use super::*;

    /// Configure a model command that drains the prompt and prints `response`.
    fn use_model_script(root: &Path, response: &str) {
        let paths = RemedyPaths::new(root);
        let script = root.join("model.sh");
        let response_path = root.join("response.txt");
        fs::write(&response_path, response).expect("write response");
        fs::write(
            &script,
            format!("cat >/dev/null\ncat '{}'\n", response_path.display()),
        )
        .expect("write script");
        let mut cfg = RemedyConfig::default();
        cfg.model.command = vec!["sh".to_string(), script.display().to_string()];
        cfg.observe_interval_secs = 0;
        write_config(&paths.config_path, &cfg).expect("write config");
    }

    #[test]
    fn step_prints_decision_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_remedy(temp.path(), &InitOptions { force: false }).expect("init");
        use_model_script(
            temp.path(),
            r#"{"reasoning":"scale up","resolved":false,"next_action":{"name":"Scale up","action":"ScaleDeployment","description":"d","params":{"replicas":"3"}}}"#,
        );

        let output = remedy(
            temp.path(),
            &["step", "--issue", ".remedy/issue.example.toml"],
        );
        assert_eq!(output.status.code(), Some(exit_codes::OK));
        let decision: serde_json::Value =
            serde_json::from_str(&stdout(&output)).expect("decision json");
        assert_eq!(decision["next_action"]["action"], "ScaleDeployment");
        assert_eq!(decision["next_action"]["params"]["replicas"], "3");
    }

    #[test]
    fn step_with_prose_response_is_unparseable() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_remedy(temp.path(), &InitOptions { force: false }).expect("init");
        use_model_script(temp.path(), "not json at all");

        let output = remedy(
            temp.path(),
            &["step", "--issue", ".remedy/issue.example.toml"],
        );
        assert_eq!(output.status.code(), Some(exit_codes::UNPARSEABLE));
        let decision: serde_json::Value =
            serde_json::from_str(&stdout(&output)).expect("sentinel json");
        assert_eq!(decision["resolved"], false);
        assert!(
            decision["reasoning"]
                .as_str()
                .is_some_and(|r| r.contains("Failed to parse"))
        );
    }

    #[test]
    fn run_resolves_and_writes_transcripts() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_remedy(temp.path(), &InitOptions { force: false }).expect("init");
        use_model_script(
            temp.path(),
            r#"{"reasoning":"healthy","resolved":true,"next_action":null,"postmortem_summary":"recovered","root_cause":"limit","impact":"none","lessons_learned":[],"prevention_actions":[]}"#,
        );

        let output = remedy(
            temp.path(),
            &["run", "--issue", ".remedy/issue.example.toml"],
        );
        assert_eq!(output.status.code(), Some(exit_codes::OK));

        let issue_dir = RemedyPaths::new(temp.path()).issue_dir("checkout-oom");
        let postmortem = fs::read_to_string(issue_dir.join("postmortem.json")).expect("postmortem");
        assert!(postmortem.contains("recovered"));
        let meta = fs::read_to_string(issue_dir.join("1").join("meta.json")).expect("meta");
        assert!(meta.contains("\"resolved\""));
        assert!(issue_dir.join("1").join("prompt.md").is_file());
    }

    #[test]
    fn run_escalates_when_budget_exhausted() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_remedy(temp.path(), &InitOptions { force: false }).expect("init");
        use_model_script(
            temp.path(),
            r#"{"reasoning":"restart it","resolved":false,"next_action":{"name":"restart","action":"RestartDeployment","description":"d","params":{}}}"#,
        );

        let output = remedy(
            temp.path(),
            &[
                "run",
                "--issue",
                ".remedy/issue.example.toml",
                "--max-steps",
                "2",
                "--dry-run",
            ],
        );
        assert_eq!(output.status.code(), Some(exit_codes::ESCALATED));

        let issue_dir = RemedyPaths::new(temp.path()).issue_dir("checkout-oom");
        let escalation: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(issue_dir.join("escalation.json")).expect("escalation"),
        )
        .expect("escalation json");
        assert_eq!(escalation["reason"]["kind"], "budget_exhausted");
        assert_eq!(escalation["history"].as_array().map(Vec::len), Some(2));
        assert!(
            escalation["history"][0]["observation"]
                .as_str()
                .is_some_and(|o| o.starts_with("dry run"))
        );
    }
}
