//! API request handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::session::{
    CreateSessionRequest, Session, SessionDetails, SessionStatus, SessionSummary,
};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Service index returned at the root.
pub async fn index() -> Json<Value> {
    Json(json!({
        "name": "teleport",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /teleport": "Create a session (repository + config)",
            "GET /sessions": "List active sessions",
            "GET /sessions/{id}": "Get session details",
            "DELETE /sessions/{id}": "Kill a session",
            "POST /sessions/{id}/activity": "Record session activity",
            "POST /sessions/{id}/push": "Commit and push session changes",
            "GET /health": "Health check",
        },
    }))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: SessionCounts,
}

/// Session counts for health reporting. `terminals` comes from the
/// multiplexer and may drift from `active`; the registry is authoritative.
#[derive(Debug, Serialize)]
pub struct SessionCounts {
    pub active: usize,
    pub terminals: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let active = state.sessions.session_count().await;
    let terminals = state.sessions.live_terminals().await.len();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: SessionCounts { active, terminals },
    })
}

/// Readiness probe.
pub async fn ready() -> Json<Value> {
    Json(json!({ "ready": true }))
}

/// Liveness probe.
pub async fn live() -> Json<Value> {
    Json(json!({ "alive": true }))
}

/// Response from session creation.
#[derive(Debug, Serialize)]
pub struct TeleportResponse {
    pub session_id: String,
    pub terminal: String,
    pub status: SessionStatus,
    pub work_dir: std::path::PathBuf,
}

impl From<&Session> for TeleportResponse {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            terminal: session.terminal.clone(),
            status: session.status,
            work_dir: session.work_dir.clone(),
        }
    }
}

/// Create a new session: synchronize the repository, materialize config,
/// and launch the agent.
#[instrument(skip(state, request), fields(repo_url = %request.repo_url))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<TeleportResponse>)> {
    let session = state.sessions.create_session(request).await?;
    info!(session_id = %session.id, "Created new session");

    Ok((StatusCode::CREATED, Json(TeleportResponse::from(&session))))
}

/// Session list response.
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

/// List all sessions.
#[instrument(skip(state))]
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    let sessions = state.sessions.list_sessions().await;
    Json(SessionListResponse { sessions })
}

/// Get details of a specific session.
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionDetails>> {
    match state.sessions.get_session(&session_id).await {
        Some(details) => Ok(Json(details)),
        None => Err(ApiError::not_found(format!(
            "Session {session_id} not found"
        ))),
    }
}

/// Kill a session.
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sessions.kill_session(&session_id).await?;
    info!(session_id = %session_id, "Killed session");

    Ok(StatusCode::NO_CONTENT)
}

/// Record an activity signal for a session, deferring idle eviction.
#[instrument(skip(state))]
pub async fn touch_activity(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sessions.touch_activity(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Push request body.
#[derive(Debug, Default, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// Push response.
#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub committed: bool,
    pub pushed: bool,
}

/// Commit and push changes from a session's workspace.
#[instrument(skip(state, body))]
pub async fn push_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Option<Json<PushRequest>>,
) -> ApiResult<Json<PushResponse>> {
    let message = body.and_then(|Json(req)| req.message);
    let outcome = state
        .sessions
        .push_session(&session_id, message.as_deref())
        .await?;
    info!(
        session_id = %session_id,
        committed = outcome.committed,
        pushed = outcome.pushed,
        "Push request handled"
    );

    Ok(Json(PushResponse {
        committed: outcome.committed,
        pushed: outcome.pushed,
    }))
}
