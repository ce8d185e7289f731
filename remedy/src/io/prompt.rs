//! Prompt builder for the step and analysis calls.
//!
//! Templates are sectioned with `<!-- section:KEY required|droppable -->`
//! markers. The rendered prompt is kept under a byte budget: the live cluster
//! context is truncated first, then dropped, then the remaining droppable
//! sections go. Required sections are never removed.

use std::borrow::Cow;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::catalog::{CATALOG, CATALOG_VERSION};
use crate::core::hints;
use crate::core::history::StepHistory;
use crate::core::text::truncate_chars;
use crate::core::types::IssueContext;
use crate::io::actuator::render_params;

const AGENTIC_STEP_TEMPLATE: &str = include_str!("prompts/agentic_step.md");
const ANALYZE_TEMPLATE: &str = include_str!("prompts/analyze.md");

/// Cluster context shorter than this is dropped rather than truncated.
const MIN_CLUSTER_BYTES: usize = 256;
/// Room left for the truncation notice appended to the cluster context.
const NOTICE_RESERVE: usize = 64;

/// Size limits applied while building prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptLimits {
    pub budget_bytes: usize,
    pub cluster_context_max_chars: usize,
    pub observation_max_chars: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            budget_bytes: 60_000,
            cluster_context_max_chars: 12_000,
            observation_max_chars: 2_000,
        }
    }
}

/// Inputs of one agentic step prompt.
#[derive(Debug, Clone, Copy)]
pub struct StepPromptInput<'a> {
    pub issue: &'a IssueContext,
    pub history: &'a StepHistory,
    pub step_number: u32,
    pub max_steps: u32,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex")
});

/// Neutralize section markers inside interpolated text so issue facts,
/// snapshots and model output cannot open sections of their own.
fn defuse(text: &str) -> Cow<'_, str> {
    SECTION_RE.replace_all(text, "[section marker removed]")
}

#[derive(Debug, Serialize)]
struct IssueView<'a> {
    name: Cow<'a, str>,
    namespace: Cow<'a, str>,
    resource: String,
    signal: Cow<'a, str>,
    severity: Cow<'a, str>,
    description: Cow<'a, str>,
    risk_score: u8,
}

impl<'a> IssueView<'a> {
    fn from_issue(issue: &'a IssueContext) -> Self {
        Self {
            name: defuse(&issue.issue_name),
            namespace: defuse(&issue.namespace),
            resource: defuse(&issue.resource_label()).into_owned(),
            signal: defuse(&issue.signal_type),
            severity: defuse(&issue.severity),
            description: defuse(issue.description.trim()),
            risk_score: issue.risk_score,
        }
    }
}

#[derive(Debug, Serialize)]
struct ParamView {
    key: &'static str,
    required: bool,
    description: &'static str,
}

#[derive(Debug, Serialize)]
struct ActionView {
    name: &'static str,
    summary: &'static str,
    params: Vec<ParamView>,
    open_params: bool,
    guidance: &'static str,
}

fn catalog_view() -> Vec<ActionView> {
    CATALOG
        .iter()
        .map(|spec| ActionView {
            name: spec.kind.as_str(),
            summary: spec.summary,
            params: spec
                .params
                .iter()
                .map(|p| ParamView {
                    key: p.key,
                    required: p.required,
                    description: p.description,
                })
                .collect(),
            open_params: spec.open_params,
            guidance: spec.guidance,
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct StepView {
    step_number: u32,
    reasoning: String,
    action: Option<String>,
    params: String,
    observation: Option<String>,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("agentic_step", AGENTIC_STEP_TEMPLATE)
            .expect("agentic step template should be valid");
        env.add_template("analyze", ANALYZE_TEMPLATE)
            .expect("analyze template should be valid");
        Self { env }
    }
}

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output at section markers, dropping empty optional sections.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required: kind.as_str() == "required",
                content,
            });
        }
    }
    sections
}

fn rendered_len(sections: &[ParsedSection]) -> usize {
    let body: usize = sections.iter().map(|s| s.content.len()).sum();
    body + 2 * sections.len().saturating_sub(1)
}

fn render_sections(sections: &[ParsedSection]) -> String {
    let mut out = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}

/// Drop droppable sections (other than the cluster context) until within budget.
fn drop_for_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    while rendered_len(sections) > budget {
        let Some(idx) = sections.iter().rposition(|s| !s.required) else {
            warn!(
                bytes = rendered_len(sections),
                budget, "prompt exceeds budget with only required sections left"
            );
            return;
        };
        let dropped = sections.remove(idx);
        debug!(
            section = dropped.key,
            bytes_dropped = dropped.content.len(),
            "dropped section for budget"
        );
    }
}

/// Cut `text` to at most `keep` bytes on a char boundary, noting the loss.
fn truncate_bytes(text: &str, keep: usize) -> String {
    let mut cut = keep.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[truncated {} bytes for prompt budget]",
        &text[..cut],
        text.len() - cut
    )
}

/// Builds step and analysis prompts within the configured limits.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    limits: PromptLimits,
}

impl PromptBuilder {
    pub fn new(limits: PromptLimits) -> Self {
        Self { limits }
    }

    /// Build the prompt for one agentic step.
    pub fn build_step(&self, input: &StepPromptInput<'_>) -> Result<String> {
        let history: Vec<StepView> = input
            .history
            .steps()
            .iter()
            .map(|step| StepView {
                step_number: step.step_number,
                reasoning: defuse(step.ai_reasoning.trim()).into_owned(),
                action: step.action.as_deref().map(|a| defuse(a).into_owned()),
                params: defuse(&render_params(&step.params)).into_owned(),
                observation: step.observation.as_deref().map(|o| {
                    truncate_chars(&defuse(o.trim()), self.limits.observation_max_chars)
                }),
            })
            .collect();
        let hints: Vec<&str> = hints::detect(input.issue)
            .into_iter()
            .map(|h| h.guidance())
            .collect();
        let issue = IssueView::from_issue(input.issue);
        let failure = optional_text(input.issue.previous_failure_context.as_deref()).map(defuse);

        self.render_within_budget("agentic_step", input.issue, |cluster| {
            context! {
                issue => &issue,
                cluster => cluster,
                failure => failure,
                hints => &hints,
                catalog_version => CATALOG_VERSION,
                actions => catalog_view(),
                history => &history,
                step_number => input.step_number,
                max_steps => input.max_steps,
                final_step => input.step_number >= input.max_steps,
            }
        })
    }

    /// Build the single-shot analysis prompt.
    pub fn build_analysis(&self, issue: &IssueContext) -> Result<String> {
        let hints: Vec<&str> = hints::detect(issue)
            .into_iter()
            .map(|h| h.guidance())
            .collect();
        let view = IssueView::from_issue(issue);
        let failure = optional_text(issue.previous_failure_context.as_deref()).map(defuse);

        self.render_within_budget("analyze", issue, |cluster| {
            context! {
                issue => &view,
                cluster => cluster,
                failure => failure,
                hints => &hints,
                catalog_version => CATALOG_VERSION,
                actions => catalog_view(),
            }
        })
    }

    fn render_within_budget(
        &self,
        template: &str,
        issue: &IssueContext,
        ctx: impl Fn(Option<&str>) -> minijinja::Value,
    ) -> Result<String> {
        let budget = self.limits.budget_bytes;
        let cluster = optional_text(issue.cluster_context.as_deref())
            .map(|c| truncate_chars(&defuse(c), self.limits.cluster_context_max_chars));
        let render = |cluster: Option<&str>| -> Result<Vec<ParsedSection>> {
            let rendered = ENGINE
                .env
                .get_template(template)?
                .render(ctx(cluster))
                .with_context(|| format!("render {template} prompt"))?;
            Ok(parse_sections(&rendered))
        };

        let mut sections = render(cluster.as_deref())?;
        let size = rendered_len(&sections);
        if size > budget
            && let Some(text) = cluster.as_deref()
        {
            let keep = text.len().saturating_sub(size - budget + NOTICE_RESERVE);
            if keep >= MIN_CLUSTER_BYTES {
                debug!(before = text.len(), after = keep, "truncated cluster context for budget");
                sections = render(Some(&truncate_bytes(text, keep)))?;
            } else {
                debug!(bytes_dropped = text.len(), "dropped cluster context for budget");
                sections = render(None)?;
            }
        }
        drop_for_budget(&mut sections, budget);
        Ok(render_sections(&sections))
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(PromptLimits::default())
    }
}

fn optional_text(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}
