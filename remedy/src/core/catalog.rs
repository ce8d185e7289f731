//! Fixed, versioned vocabulary of remediation actions.
//!
//! The catalog is the safety boundary of the control loop: the reasoning model
//! may only propose actions listed here, and [`RemediationAction::from_proposal`]
//! enforces every parameter contract that can be checked without live cluster
//! state before anything reaches an actuator.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::core::types::ProposedAction;

/// Version tag rendered into prompts and exposed over RPC.
pub const CATALOG_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    RestartDeployment,
    ScaleDeployment,
    RollbackDeployment,
    AdjustResources,
    DeletePod,
    PatchConfig,
    Observe,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::RestartDeployment,
        ActionKind::ScaleDeployment,
        ActionKind::RollbackDeployment,
        ActionKind::AdjustResources,
        ActionKind::DeletePod,
        ActionKind::PatchConfig,
        ActionKind::Observe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::RestartDeployment => "RestartDeployment",
            ActionKind::ScaleDeployment => "ScaleDeployment",
            ActionKind::RollbackDeployment => "RollbackDeployment",
            ActionKind::AdjustResources => "AdjustResources",
            ActionKind::DeletePod => "DeletePod",
            ActionKind::PatchConfig => "PatchConfig",
            ActionKind::Observe => "Observe",
        }
    }

    /// Exact, case-sensitive lookup by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn is_mutating(self) -> bool {
        self != ActionKind::Observe
    }

    /// `CATALOG` is laid out in declaration order of `ActionKind`.
    pub fn spec(self) -> &'static ActionSpec {
        &CATALOG[self as usize]
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParamSpec {
    pub key: &'static str,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub summary: &'static str,
    pub params: &'static [ParamSpec],
    /// Accepts keys beyond `params` (PatchConfig data entries).
    pub open_params: bool,
    pub guidance: &'static str,
}

pub static CATALOG: [ActionSpec; 7] = [
    ActionSpec {
        kind: ActionKind::RestartDeployment,
        summary: "Rolling restart of every pod in the deployment.",
        params: &[],
        open_params: false,
        guidance: "Last resort for transient faults; it does not fix bad config, bad images or undersized resources.",
    },
    ActionSpec {
        kind: ActionKind::ScaleDeployment,
        summary: "Set the deployment replica count.",
        params: &[ParamSpec {
            key: "replicas",
            required: true,
            description: "integer >= 1",
        }],
        open_params: false,
        guidance: "Use for load-driven saturation or to shed capacity while pods are unschedulable.",
    },
    ActionSpec {
        kind: ActionKind::RollbackDeployment,
        summary: "Roll the deployment back to an earlier revision.",
        params: &[ParamSpec {
            key: "toRevision",
            required: true,
            description: "\"previous\", \"healthy\" or a revision number",
        }],
        open_params: false,
        guidance: "Preferred over restart for crash loops that began after a recent deploy.",
    },
    ActionSpec {
        kind: ActionKind::AdjustResources,
        summary: "Change container resource requests and limits.",
        params: &[
            ParamSpec {
                key: "container",
                required: false,
                description: "container name (defaults to the only container)",
            },
            ParamSpec {
                key: "memory_limit",
                required: false,
                description: "quantity, e.g. 1Gi",
            },
            ParamSpec {
                key: "memory_request",
                required: false,
                description: "quantity, e.g. 512Mi",
            },
            ParamSpec {
                key: "cpu_limit",
                required: false,
                description: "quantity, e.g. 1 or 1000m",
            },
            ParamSpec {
                key: "cpu_request",
                required: false,
                description: "quantity, e.g. 250m",
            },
        ],
        open_params: false,
        guidance: "Preferred over restart or rollback for OOM-killed pods. Never set a limit below its request.",
    },
    ActionSpec {
        kind: ActionKind::DeletePod,
        summary: "Delete a single pod so its controller recreates it.",
        params: &[ParamSpec {
            key: "pod",
            required: false,
            description: "pod name (defaults to the least healthy pod)",
        }],
        open_params: false,
        guidance: "Only for one wedged pod among healthy peers. Refused when the workload has a single pod; at most one deletion per turn.",
    },
    ActionSpec {
        kind: ActionKind::PatchConfig,
        summary: "Patch keys of a ConfigMap consumed by the workload.",
        params: &[ParamSpec {
            key: "configmap",
            required: true,
            description: "ConfigMap name; every other param is a key/value to set",
        }],
        open_params: true,
        guidance: "Use when logs or events point at a wrong configuration value.",
    },
    ActionSpec {
        kind: ActionKind::Observe,
        summary: "Execute nothing; wait for the next context refresh.",
        params: &[],
        open_params: false,
        guidance: "Use after an action that needs time to settle, or when the context is inconclusive.",
    },
];

/// A proposal that breaks the catalog contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action}: {reason}")]
pub struct ContractViolation {
    pub action: String,
    pub reason: String,
}

impl ContractViolation {
    fn new(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionTarget {
    Previous,
    Healthy,
    Number(u64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceAdjustment {
    pub container: Option<String>,
    pub memory_limit: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub cpu_request: Option<String>,
}

/// Typed view over a [`ProposedAction`], keyed by action kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationAction {
    RestartDeployment,
    ScaleDeployment { replicas: u32 },
    RollbackDeployment { to_revision: RevisionTarget },
    AdjustResources(ResourceAdjustment),
    DeletePod { pod: Option<String> },
    PatchConfig {
        configmap: String,
        data: BTreeMap<String, String>,
    },
    Observe,
}

impl RemediationAction {
    /// Validate a wire-level proposal against the catalog.
    pub fn from_proposal(proposal: &ProposedAction) -> Result<Self, ContractViolation> {
        let name = proposal.action.as_str();
        let kind = ActionKind::parse(name)
            .ok_or_else(|| ContractViolation::new(name, "not in the action catalog"))?;
        let spec = kind.spec();
        let params = &proposal.params;

        if !spec.open_params
            && let Some(key) = params
                .keys()
                .find(|key| !spec.params.iter().any(|p| p.key == key.as_str()))
        {
            return Err(ContractViolation::new(
                name,
                format!("unexpected param '{key}'"),
            ));
        }
        for param in spec.params.iter().filter(|p| p.required) {
            if params.get(param.key).is_none_or(|v| v.trim().is_empty()) {
                return Err(ContractViolation::new(
                    name,
                    format!("missing required param '{}'", param.key),
                ));
            }
        }

        let get = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let action = match kind {
            ActionKind::RestartDeployment => RemediationAction::RestartDeployment,
            ActionKind::Observe => RemediationAction::Observe,
            ActionKind::ScaleDeployment => {
                let raw = get("replicas").unwrap_or_default();
                let replicas = raw.parse::<u32>().map_err(|_| {
                    ContractViolation::new(name, format!("replicas '{raw}' is not an integer"))
                })?;
                if replicas < 1 {
                    return Err(ContractViolation::new(name, "replicas must be >= 1"));
                }
                RemediationAction::ScaleDeployment { replicas }
            }
            ActionKind::RollbackDeployment => {
                let raw = get("toRevision").unwrap_or_default();
                let to_revision = match raw.as_str() {
                    "previous" => RevisionTarget::Previous,
                    "healthy" => RevisionTarget::Healthy,
                    other => other.parse::<u64>().map(RevisionTarget::Number).map_err(|_| {
                        ContractViolation::new(
                            name,
                            format!(
                                "toRevision '{other}' must be \"previous\", \"healthy\" or a revision number"
                            ),
                        )
                    })?,
                };
                RemediationAction::RollbackDeployment { to_revision }
            }
            ActionKind::AdjustResources => {
                let adjustment = ResourceAdjustment {
                    container: get("container"),
                    memory_limit: get("memory_limit"),
                    memory_request: get("memory_request"),
                    cpu_limit: get("cpu_limit"),
                    cpu_request: get("cpu_request"),
                };
                check_resources(name, &adjustment)?;
                RemediationAction::AdjustResources(adjustment)
            }
            ActionKind::DeletePod => RemediationAction::DeletePod { pod: get("pod") },
            ActionKind::PatchConfig => {
                let configmap = get("configmap").unwrap_or_default();
                let data: BTreeMap<String, String> = params
                    .iter()
                    .filter(|(key, _)| key.as_str() != "configmap")
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                if data.is_empty() {
                    return Err(ContractViolation::new(
                        name,
                        "at least one key/value to patch is required",
                    ));
                }
                RemediationAction::PatchConfig { configmap, data }
            }
        };
        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            RemediationAction::RestartDeployment => ActionKind::RestartDeployment,
            RemediationAction::ScaleDeployment { .. } => ActionKind::ScaleDeployment,
            RemediationAction::RollbackDeployment { .. } => ActionKind::RollbackDeployment,
            RemediationAction::AdjustResources(_) => ActionKind::AdjustResources,
            RemediationAction::DeletePod { .. } => ActionKind::DeletePod,
            RemediationAction::PatchConfig { .. } => ActionKind::PatchConfig,
            RemediationAction::Observe => ActionKind::Observe,
        }
    }
}

fn check_resources(action: &str, adj: &ResourceAdjustment) -> Result<(), ContractViolation> {
    if adj.memory_limit.is_none()
        && adj.memory_request.is_none()
        && adj.cpu_limit.is_none()
        && adj.cpu_request.is_none()
    {
        return Err(ContractViolation::new(
            action,
            "at least one of memory_limit, memory_request, cpu_limit, cpu_request is required",
        ));
    }

    let memory = |key: &str, value: &Option<String>| -> Result<Option<f64>, ContractViolation> {
        value
            .as_deref()
            .map(|raw| {
                parse_memory_bytes(raw).ok_or_else(|| {
                    let message = format!("{key} '{raw}' is not a memory quantity");
                    ContractViolation::new(action, message)
                })
            })
            .transpose()
    };
    let cpu = |key: &str, value: &Option<String>| -> Result<Option<f64>, ContractViolation> {
        value
            .as_deref()
            .map(|raw| {
                parse_cpu_millis(raw).ok_or_else(|| {
                    ContractViolation::new(action, format!("{key} '{raw}' is not a cpu quantity"))
                })
            })
            .transpose()
    };

    let mem_limit = memory("memory_limit", &adj.memory_limit)?;
    let mem_request = memory("memory_request", &adj.memory_request)?;
    if let (Some(limit), Some(request)) = (mem_limit, mem_request)
        && limit < request
    {
        return Err(ContractViolation::new(
            action,
            "memory_limit must not be below memory_request",
        ));
    }

    let cpu_limit = cpu("cpu_limit", &adj.cpu_limit)?;
    let cpu_request = cpu("cpu_request", &adj.cpu_request)?;
    if let (Some(limit), Some(request)) = (cpu_limit, cpu_request)
        && limit < request
    {
        return Err(ContractViolation::new(
            action,
            "cpu_limit must not be below cpu_request",
        ));
    }
    Ok(())
}

/// Parse a Kubernetes memory quantity (`512Mi`, `1G`, `1e9`, `500m`) into bytes.
pub fn parse_memory_bytes(raw: &str) -> Option<f64> {
    const SUFFIXES: [(&str, f64); 13] = [
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
        ("m", 1e-3),
    ];
    let raw = raw.trim();
    for (suffix, factor) in SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return parse_non_negative(number).map(|n| n * factor);
        }
    }
    parse_non_negative(raw)
}

/// Parse a Kubernetes CPU quantity (`250m`, `0.5`, `2`) into millicores.
pub fn parse_cpu_millis(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if let Some(millis) = raw.strip_suffix('m') {
        return parse_non_negative(millis);
    }
    parse_non_negative(raw).map(|cores| cores * 1000.0)
}

fn parse_non_negative(raw: &str) -> Option<f64> {
    let value = raw.trim().parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}
