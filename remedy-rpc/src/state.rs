//! Shared application state for the RPC server.

use std::sync::Arc;
use std::time::Duration;

use remedy::core::budget::Deadline;
use remedy::engine::EngineSettings;
use remedy::io::config::RemedyConfig;
use remedy::io::model::ReasoningModel;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The single reasoning-model client shared by every request.
    pub model: Arc<dyn ReasoningModel>,
    pub settings: EngineSettings,
    pub step_timeout: Duration,
    pub analyze_timeout: Duration,
}

impl AppState {
    pub fn new(model: Arc<dyn ReasoningModel>, cfg: &RemedyConfig) -> Self {
        Self {
            model,
            settings: EngineSettings::from_config(cfg),
            step_timeout: cfg.step_timeout(),
            analyze_timeout: cfg.analyze_timeout(),
        }
    }

    /// Deadline from the request's `timeout_ms`, or the configured default.
    pub fn deadline(timeout_ms: Option<u64>, default: Duration) -> Deadline {
        Deadline::after(timeout_ms.map_or(default, Duration::from_millis))
    }
}
