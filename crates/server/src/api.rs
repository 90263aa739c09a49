//! JSON API over agent sessions.
//!
//! - `POST   /api/v1/sessions`                      start a conversation
//! - `POST   /api/v1/sessions/resume`               reopen a saved thread by handle
//! - `DELETE /api/v1/sessions/{session_id}`         drop a live session
//! - `POST   /api/v1/sessions/{session_id}/turns`   one orchestration call
//! - `GET    /api/v1/sessions/{session_id}/thread`  full thread
//! - `GET    /api/v1/sessions/{session_id}/metrics` token and step totals
//! - `POST   /api/v1/sessions/{session_id}/reset`   fresh thread and metrics

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use underwrite_agent::{AgentError, AgentResponse, AgentRuntime, SessionManager};
use underwrite_core::domain::conversation::{ConversationTurn, ThreadHandle};
use underwrite_core::domain::metrics::{CostEstimate, UsageMetrics};
use underwrite_core::errors::{ApplicationError, InterfaceError};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionManager>,
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    /// Text of an uploaded document; folded into this turn once per session.
    pub document: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub thread_handle: String,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub thread_handle: ThreadHandle,
}

#[derive(Debug, Serialize)]
pub struct ThreadView {
    pub session_id: String,
    pub thread_handle: ThreadHandle,
    pub complete: bool,
    pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
pub struct MetricsView {
    pub session_id: String,
    pub metrics: UsageMetrics,
    pub estimated_cost: CostEstimate,
}

#[derive(Debug, Serialize)]
pub struct ResetView {
    pub session_id: String,
    pub thread_handle: ThreadHandle,
    pub previous_thread_handle: ThreadHandle,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub kind: &'static str,
    pub correlation_id: String,
}

type ApiFailure = (StatusCode, Json<ApiError>);

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/sessions", post(create_session))
        .route("/api/v1/sessions/resume", post(resume_session))
        .route("/api/v1/sessions/{session_id}", delete(close_session))
        .route("/api/v1/sessions/{session_id}/turns", post(send_turn))
        .route("/api/v1/sessions/{session_id}/thread", get(get_thread))
        .route("/api/v1/sessions/{session_id}/metrics", get(get_metrics))
        .route("/api/v1/sessions/{session_id}/reset", post(reset_session))
        .with_state(state)
}

async fn create_session(
    State(state): State<ApiState>,
) -> Result<(StatusCode, Json<SessionView>), ApiFailure> {
    let session_id = state.sessions.create().await;
    let session = state.sessions.acquire(&session_id).await.map_err(agent_error)?;
    Ok((
        StatusCode::CREATED,
        Json(SessionView { session_id, thread_handle: session.thread_handle().clone() }),
    ))
}

async fn resume_session(
    State(state): State<ApiState>,
    Json(body): Json<ResumeRequest>,
) -> Result<(StatusCode, Json<SessionView>), ApiFailure> {
    let handle = ThreadHandle(body.thread_handle.trim().to_string());
    let Some(session_id) = state.sessions.resume(&handle).await.map_err(agent_error)? else {
        return Err(agent_error(AgentError::SessionNotFound(handle.0)));
    };
    Ok((StatusCode::CREATED, Json(SessionView { session_id, thread_handle: handle })))
}

async fn close_session(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<StatusCode, ApiFailure> {
    if state.sessions.remove(&session_id).await {
        info!(event_name = "api.session.closed", session_id = %session_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(agent_error(AgentError::SessionNotFound(session_id)))
    }
}

async fn send_turn(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
    Json(body): Json<TurnRequest>,
) -> Result<Json<AgentResponse>, ApiFailure> {
    let mut session = state.sessions.acquire(&session_id).await.map_err(agent_error)?;
    let response = state
        .runtime
        .handle_turn(&mut session, &body.message, body.document.as_deref())
        .await
        .map_err(agent_error)?;
    state.sessions.persist(&session).await;
    Ok(Json(response))
}

async fn get_thread(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<ThreadView>, ApiFailure> {
    let session = state.sessions.get(&session_id).await.map_err(agent_error)?;
    let session = session.lock().await;
    Ok(Json(ThreadView {
        session_id,
        thread_handle: session.thread_handle().clone(),
        complete: session.thread.is_complete(),
        turns: session.thread.turns().to_vec(),
    }))
}

async fn get_metrics(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<MetricsView>, ApiFailure> {
    let session = state.sessions.get(&session_id).await.map_err(agent_error)?;
    let metrics = session.lock().await.metrics();
    Ok(Json(MetricsView { session_id, metrics, estimated_cost: metrics.estimated_cost() }))
}

async fn reset_session(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<ResetView>, ApiFailure> {
    let mut session = state.sessions.acquire(&session_id).await.map_err(agent_error)?;
    let previous = state.runtime.reset_session(&mut session).await;
    Ok(Json(ResetView {
        session_id,
        thread_handle: session.thread_handle().clone(),
        previous_thread_handle: previous.continuation_handle().clone(),
    }))
}

fn agent_error(error: AgentError) -> ApiFailure {
    let message = error.user_message();
    let interface =
        ApplicationError::from(error).into_interface(Uuid::new_v4().simple().to_string());
    let (status, kind) = match &interface {
        InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
        InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
        }
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    warn!(
        event_name = "api.request.failed",
        correlation_id = interface.correlation_id(),
        kind,
        error = %interface,
        "request failed"
    );
    (
        status,
        Json(ApiError {
            error: message.to_string(),
            kind,
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}
