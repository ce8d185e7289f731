//! Per-turn audit transcripts under `.remedy/issues/<issue>/<step>/`.
//!
//! Transcripts are product artifacts: always written by `remedy run` and
//! unaffected by `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::parser::ParseFailure;
use crate::core::types::StepDecision;

pub const ESCALATION_FILE: &str = "escalation.json";
pub const POSTMORTEM_FILE: &str = "postmortem.json";

/// What a turn amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Acted,
    Refused,
    ActuationFailed,
    Observed,
    Resolved,
    Unparseable,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnMeta {
    pub issue: String,
    pub step: u32,
    pub max_steps: u32,
    pub outcome: TurnOutcome,
    pub action: Option<String>,
    pub started_at: String,
    pub duration_ms: u64,
    /// Hex sha256 of `prompt.md`.
    pub prompt_sha256: String,
    pub prompt_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_failure: Option<ParseFailure>,
}

impl TurnMeta {
    pub fn timestamp(at: DateTime<Utc>) -> String {
        at.to_rfc3339()
    }
}

#[derive(Debug, Clone)]
pub struct TurnPaths {
    pub dir: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub decision_path: PathBuf,
    pub meta_path: PathBuf,
}

impl TurnPaths {
    pub fn new(issue_dir: &Path, step: u32) -> Self {
        let dir = issue_dir.join(step.to_string());
        Self {
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.txt"),
            decision_path: dir.join("decision.json"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }
}

pub struct TurnWriteRequest<'a> {
    pub issue_dir: &'a Path,
    pub meta: &'a TurnMeta,
    pub prompt: &'a str,
    pub raw_response: &'a str,
    pub decision: &'a StepDecision,
}

pub fn write_turn(request: &TurnWriteRequest<'_>) -> Result<TurnPaths> {
    let paths = TurnPaths::new(request.issue_dir, request.meta.step);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create turn dir {}", paths.dir.display()))?;

    write_text(&paths.prompt_path, request.prompt)?;
    write_text(&paths.response_path, request.raw_response)?;
    write_json(&paths.decision_path, request.decision)?;
    write_json(&paths.meta_path, request.meta)?;
    Ok(paths)
}

/// Write an issue-level artifact such as [`ESCALATION_FILE`] or [`POSTMORTEM_FILE`].
pub fn write_issue_artifact<T: Serialize>(
    issue_dir: &Path,
    file_name: &str,
    value: &T,
) -> Result<PathBuf> {
    fs::create_dir_all(issue_dir)
        .with_context(|| format!("create issue dir {}", issue_dir.display()))?;
    let path = issue_dir.join(file_name);
    write_json(&path, value)?;
    Ok(path)
}

/// Hex-encoded sha256 of the prompt text.
pub fn prompt_digest(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PostmortemRecord;

    #[test]
    fn turn_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TurnPaths::new(&temp.path().join("checkout-oom"), 3);
        assert!(paths.dir.ends_with(Path::new("checkout-oom/3")));
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.response_path.ends_with("response.txt"));
        assert!(paths.decision_path.ends_with("decision.json"));
        assert!(paths.meta_path.ends_with("meta.json"));
    }

    #[test]
    fn writes_turn_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let prompt = "### Remediation Contract";
        let meta = TurnMeta {
            issue: "checkout-oom".to_string(),
            step: 1,
            max_steps: 10,
            outcome: TurnOutcome::Observed,
            action: None,
            started_at: TurnMeta::timestamp(Utc::now()),
            duration_ms: 12,
            prompt_sha256: prompt_digest(prompt),
            prompt_bytes: prompt.len(),
            parse_failure: None,
        };
        let decision = StepDecision {
            reasoning: "wait".to_string(),
            ..StepDecision::default()
        };

        let paths = write_turn(&TurnWriteRequest {
            issue_dir: temp.path(),
            meta: &meta,
            prompt,
            raw_response: "{\"reasoning\":\"wait\",\"resolved\":false}",
            decision: &decision,
        })
        .expect("write turn");

        assert_eq!(fs::read_to_string(&paths.prompt_path).expect("prompt"), prompt);
        let meta_json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("meta"))
                .expect("meta json");
        assert_eq!(meta_json["outcome"], "observed");
        assert_eq!(meta_json["prompt_sha256"].as_str().map(str::len), Some(64));
        assert!(meta_json.get("parse_failure").is_none());
    }

    #[test]
    fn writes_issue_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let record = PostmortemRecord {
            summary: "fixed".to_string(),
            ..PostmortemRecord::default()
        };
        let path = write_issue_artifact(temp.path(), POSTMORTEM_FILE, &record).expect("write");
        assert!(path.ends_with(POSTMORTEM_FILE));
        assert!(fs::read_to_string(path).expect("read").contains("\"fixed\""));
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            prompt_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
