//! Detection of well-known incident signatures in issue facts.
//!
//! Hints only steer the prompt. They never pick an action on their own.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::types::IssueContext;

static OOM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\boom(?:[-_ ]?kill(?:ed)?)?\b|out[- ]of[- ]memory|exit code 137")
        .expect("oom regex")
});
static CRASHLOOP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)crash[-_ ]?loop").expect("crashloop regex"));
static RECENT_CHANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:recent(?:ly)? deploy\w*|deployed|rollout|rolled out|new (?:image|version|release)|image (?:change|update|tag)|upgrade[ds]?)\b",
    )
    .expect("recent change regex")
});
static UNSCHEDULABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:unschedulable|pending|insufficient (?:cpu|memory)|failedscheduling)\b")
        .expect("unschedulable regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalHint {
    OomKilled,
    CrashLoopAfterDeploy,
    Unschedulable,
}

impl SignalHint {
    pub fn guidance(self) -> &'static str {
        match self {
            SignalHint::OomKilled => {
                "Pods are being OOM-killed: prefer AdjustResources (raise memory_limit and memory_request) over RestartDeployment or RollbackDeployment. A restart alone will be killed again."
            }
            SignalHint::CrashLoopAfterDeploy => {
                "The crash loop follows a recent deploy: prefer RollbackDeployment with toRevision=previous over RestartDeployment."
            }
            SignalHint::Unschedulable => {
                "Pods cannot be scheduled: prefer lowering requests with AdjustResources or reducing replicas with ScaleDeployment before restarting anything."
            }
        }
    }
}

/// Return every hint whose signature matches the issue's signal and description.
pub fn detect(issue: &IssueContext) -> Vec<SignalHint> {
    let text = format!("{}\n{}", issue.signal_type, issue.description);
    let mut hints = Vec::new();
    if OOM_RE.is_match(&text) {
        hints.push(SignalHint::OomKilled);
    }
    if CRASHLOOP_RE.is_match(&text) && RECENT_CHANGE_RE.is_match(&text) {
        hints.push(SignalHint::CrashLoopAfterDeploy);
    }
    if UNSCHEDULABLE_RE.is_match(&text) {
        hints.push(SignalHint::Unschedulable);
    }
    hints
}
