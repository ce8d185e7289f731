//! Closure record synthesis for resolved incidents.

use crate::core::types::{PostmortemRecord, StepDecision};

/// Map a resolved decision's closure fields 1:1 into a postmortem.
///
/// Returns `None` for unresolved decisions. Missing text fields become empty
/// strings and missing lists stay empty.
pub fn synthesize(decision: &StepDecision) -> Option<PostmortemRecord> {
    if !decision.resolved {
        return None;
    }
    Some(PostmortemRecord {
        summary: decision.postmortem_summary.clone().unwrap_or_default(),
        root_cause: decision.root_cause.clone().unwrap_or_default(),
        impact: decision.impact.clone().unwrap_or_default(),
        lessons_learned: decision.lessons_learned.clone(),
        prevention_actions: decision.prevention_actions.clone(),
    })
}
