//! HTTP route handlers for the remediation API.
//!
//! Engine calls are synchronous, so each one runs on the blocking pool. If
//! the client goes away the handler future is dropped, which cancels the
//! call's deadline and stops the model command.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tracing::info;

use remedy::core::budget::{CancelHandle, Deadline};
use remedy::core::catalog::{ActionSpec, CATALOG, CATALOG_VERSION};
use remedy::core::history::StepHistory;
use remedy::core::parser::ParseFailure;
use remedy::core::postmortem;
use remedy::core::types::{AnalysisResult, IssueContext, PostmortemRecord, StepDecision};
use remedy::engine::{self, EngineError, StepRequest};

use crate::error::ApiError;
use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/catalog", get(catalog))
        .route("/v1/analyze", post(analyze))
        .route("/v1/step", post(step))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct CatalogResponse {
    pub version: &'static str,
    pub actions: &'static [ActionSpec],
}

/// GET /v1/catalog - catalog version plus action specs.
async fn catalog() -> Json<CatalogResponse> {
    Json(CatalogResponse {
        version: CATALOG_VERSION,
        actions: &CATALOG,
    })
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    pub issue: IssueContext,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub analysis: AnalysisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_failure: Option<ParseFailure>,
}

/// POST /v1/analyze - single-shot recommendation for one issue.
async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let Json(body) = payload?;
    info!(issue = %body.issue.issue_name, "analyze");
    let deadline = AppState::deadline(body.timeout_ms, state.analyze_timeout);
    let model = Arc::clone(&state.model);
    let settings = state.settings;
    let parsed = run_blocking(deadline, move |deadline| {
        engine::analyze_issue(model.as_ref(), &settings, &body.issue, deadline)
    })
    .await?;

    Ok(Json(AnalyzeResponse {
        parse_failure: parsed.failure().cloned(),
        analysis: parsed.into_value(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StepBody {
    pub issue: IssueContext,
    #[serde(default)]
    pub history: StepHistory,
    pub step_number: u32,
    pub max_steps: u32,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub decision: StepDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_failure: Option<ParseFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postmortem: Option<PostmortemRecord>,
}

/// POST /v1/step - exactly one decision for the given issue and history.
async fn step(
    State(state): State<AppState>,
    payload: Result<Json<StepBody>, JsonRejection>,
) -> Result<Json<StepResponse>, ApiError> {
    let Json(body) = payload?;
    info!(
        issue = %body.issue.issue_name,
        step = body.step_number,
        max_steps = body.max_steps,
        "step"
    );
    let deadline = AppState::deadline(body.timeout_ms, state.step_timeout);
    let model = Arc::clone(&state.model);
    let settings = state.settings;
    let parsed = run_blocking(deadline, move |deadline| {
        let request = StepRequest {
            issue: &body.issue,
            history: &body.history,
            step_number: body.step_number,
            max_steps: body.max_steps,
        };
        engine::step(model.as_ref(), &settings, &request, deadline)
    })
    .await?;

    let parse_failure = parsed.failure().cloned();
    let decision = parsed.into_value();
    Ok(Json(StepResponse {
        postmortem: postmortem::synthesize(&decision),
        parse_failure,
        decision,
    }))
}

/// Cancels the call's deadline when the request future is dropped.
struct CancelOnDrop(CancelHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn run_blocking<T, F>(deadline: Deadline, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Deadline) -> Result<T, EngineError> + Send + 'static,
{
    let _guard = CancelOnDrop(deadline.cancel_handle());
    let joined = tokio::task::spawn_blocking(move || work(&deadline)).await;
    match joined {
        Ok(result) => result.map_err(ApiError::from),
        Err(err) => Err(ApiError::internal(format!("engine worker failed: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use remedy::io::config::RemedyConfig;
    use remedy::io::model::ModelError;
    use remedy::test_support::{ScriptedModel, action_response, resolved_response, sample_issue};

    fn state_with(model: ScriptedModel) -> AppState {
        AppState::new(Arc::new(model), &RemedyConfig::default())
    }

    fn step_body(issue: IssueContext) -> StepBody {
        StepBody {
            issue,
            history: StepHistory::new(),
            step_number: 1,
            max_steps: 5,
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn step_returns_decision() {
        let state = state_with(ScriptedModel::replying(&[action_response(
            "scale up",
            "ScaleDeployment",
            &[("replicas", "3")],
        )]));
        let Json(response) = step(State(state), Ok(Json(step_body(sample_issue()))))
            .await
            .expect("step");
        let action = response.decision.next_action.expect("action");
        assert_eq!(action.action, "ScaleDeployment");
        assert!(response.parse_failure.is_none());
        assert!(response.postmortem.is_none());
    }

    #[tokio::test]
    async fn resolved_step_carries_postmortem() {
        let state = state_with(ScriptedModel::replying(&[resolved_response("stable")]));
        let Json(response) = step(State(state), Ok(Json(step_body(sample_issue()))))
            .await
            .expect("step");
        assert_eq!(
            response.postmortem.map(|p| p.summary),
            Some("stable".to_string())
        );
    }

    #[tokio::test]
    async fn missing_issue_name_is_bad_request() {
        let state = state_with(ScriptedModel::replying(&[]));
        let mut issue = sample_issue();
        issue.issue_name = String::new();
        let err = step(State(state), Ok(Json(step_body(issue))))
            .await
            .expect_err("invalid");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "invalid_argument");
    }

    #[tokio::test]
    async fn model_failure_is_internal() {
        let state = state_with(ScriptedModel::new(vec![Err(ModelError::Transport(
            "connection reset".to_string(),
        ))]));
        let err = step(State(state), Ok(Json(step_body(sample_issue()))))
            .await
            .expect_err("model failure");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn zero_timeout_is_deadline_exceeded() {
        let state = state_with(ScriptedModel::replying(&[resolved_response("late")]));
        let mut body = step_body(sample_issue());
        body.timeout_ms = Some(0);
        let err = step(State(state), Ok(Json(body))).await.expect_err("deadline");
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn unparseable_analysis_reports_failure() {
        let state = state_with(ScriptedModel::replying(&["no idea".to_string()]));
        let Json(response) = analyze(
            State(state),
            Ok(Json(AnalyzeBody {
                issue: sample_issue(),
                timeout_ms: None,
            })),
        )
        .await
        .expect("analyze");
        assert!(response.parse_failure.is_some());
        assert_eq!(response.analysis.confidence, 0.0);
    }

    async fn post_json(state: AppState, uri: &str, payload: Value) -> (StatusCode, Value) {
        let response = api_router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn issue_json() -> Value {
        serde_json::to_value(sample_issue()).expect("issue json")
    }

    #[tokio::test]
    async fn step_without_issue_is_invalid_argument() {
        let state = state_with(ScriptedModel::replying(&[]));
        let (status, body) =
            post_json(state, "/v1/step", json!({"step_number": 1, "max_steps": 5})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");
        assert!(body["message"].as_str().is_some_and(|m| m.contains("issue")));
    }

    #[tokio::test]
    async fn out_of_range_risk_score_is_invalid_argument() {
        let mut issue = issue_json();
        issue["risk_score"] = json!(300);

        let state = state_with(ScriptedModel::replying(&[]));
        let (status, body) = post_json(
            state,
            "/v1/step",
            json!({"issue": issue.clone(), "step_number": 1, "max_steps": 5}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");

        let state = state_with(ScriptedModel::replying(&[]));
        let (status, body) = post_json(state, "/v1/analyze", json!({"issue": issue})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn analyze_without_issue_is_invalid_argument() {
        let state = state_with(ScriptedModel::replying(&[]));
        let (status, body) = post_json(state, "/v1/analyze", json!({"timeout_ms": 100})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn well_formed_step_passes_through_router() {
        let state = state_with(ScriptedModel::replying(&[resolved_response("stable")]));
        let (status, body) = post_json(
            state,
            "/v1/step",
            json!({"issue": issue_json(), "step_number": 1, "max_steps": 5}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decision"]["resolved"], true);
    }

    #[tokio::test]
    async fn catalog_lists_version() {
        let Json(response) = catalog().await;
        assert_eq!(response.version, "v1");
        assert_eq!(response.actions.len(), 7);
    }
}
