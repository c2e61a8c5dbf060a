//! HTTP routes: the agent endpoint, health, and the trace bus.

use agent::core::types::AgentResponse;
use agent::orchestrator::RunOptions;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use tracing::info;

use crate::sse;
use crate::state::{AppState, PushedEvent};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/agent", post(run_agent))
        .route("/healthz", get(health))
        .route("/trace/push", post(push_trace))
        .route("/trace/stream", get(sse::stream_by_query))
        .route("/trace/stream/{session_id}", get(sse::stream_by_path))
}

/// Body of `POST /api/agent`.
#[derive(Debug, Deserialize)]
pub struct AgentRequest {
    pub prompt: String,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, alias = "plannerUrl")]
    pub planner_url: Option<String>,
}

async fn health() -> &'static str {
    "ok"
}

/// POST /api/agent - run one cycle. Cycle failures are reported in the body, not the status.
async fn run_agent(
    State(state): State<AppState>,
    Json(request): Json<AgentRequest>,
) -> Result<Json<AgentResponse>, (StatusCode, &'static str)> {
    if request.prompt.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "prompt is required"));
    }
    let options = RunOptions {
        session_id: request.session_id,
        planner_url: request.planner_url,
    };
    let response = state
        .agent
        .run_agent_within(&request.prompt, options, state.cycle_timeout)
        .await;
    info!(
        session_id = %response.session_id,
        actions = response.plan.len(),
        failed = response.error.is_some(),
        "agent request finished"
    );
    Ok(Json(response))
}

/// POST /trace/push - accept one trace event from any emitter.
async fn push_trace(State(state): State<AppState>, Json(event): Json<PushedEvent>) -> StatusCode {
    state.bus.publish(event);
    StatusCode::NO_CONTENT
}
