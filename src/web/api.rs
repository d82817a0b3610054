//! REST API handlers for session control

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use claude_remote_core::{
    DisplayMode, LogBuffer, PromptScanner, SessionRegistry, SupervisorError,
};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// Helper to create JSON error responses
fn json_error(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"error": message})))
}

/// Map a registry error onto an HTTP status
fn supervisor_error(err: SupervisorError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        SupervisorError::SessionNotFound { .. } => {
            return json_error(StatusCode::NOT_FOUND, "Session not found")
        }
        SupervisorError::ProcessNotActive { .. } => StatusCode::CONFLICT,
        SupervisorError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        SupervisorError::StartFailure { .. }
        | SupervisorError::Io { .. }
        | SupervisorError::PartialTermination { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, &err.to_string())
}

/// Shared application state for API handlers
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub scanner: PromptScanner,
}

impl ApiState {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let scanner = PromptScanner::for_registry(&registry);
        Self { registry, scanner }
    }
}

/// Session creation request body (all fields optional)
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
    pub working_dir: Option<PathBuf>,
}

/// Message request body
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub message: String,
}

/// Prompt response request body
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    #[serde(default)]
    pub response: String,
}

/// Query parameters for the logs endpoint
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_lines")]
    pub lines: usize,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default)]
    pub formatted: bool,
}

fn default_log_lines() -> usize {
    50
}

/// GET /health - sweep dead sessions and report
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let report = state.registry.health_sweep().await;
    Json(json!({
        "status": "healthy",
        "supervisor_version": env!("CARGO_PKG_VERSION"),
        "session_health": report,
    }))
}

/// POST /sessions - create a session
pub async fn create_session(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    // An empty body means "all defaults"
    let req: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            json_error(
                StatusCode::BAD_REQUEST,
                &format!("Invalid request body: {}", e),
            )
        })?
    };

    let name = req.name.as_deref().filter(|n| !n.trim().is_empty());
    let session_id = state
        .registry
        .create(name, req.working_dir.as_deref())
        .await
        .map_err(supervisor_error)?;

    tracing::info!(session_id = %session_id, "API: created session");
    Ok((
        StatusCode::CREATED,
        Json(json!({"session_id": session_id, "status": "created"})),
    ))
}

/// GET /sessions - list sessions
pub async fn list_sessions(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let sessions = state.registry.list().await;
    Json(json!({ "sessions": sessions }))
}

/// GET /sessions/{id}/status
pub async fn get_session_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let status = state
        .registry
        .get_status(&id)
        .await
        .map_err(supervisor_error)?;
    Ok(Json(json!(status)))
}

/// POST /sessions/{id}/message
pub async fn send_message(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> ApiResult {
    if req.message.trim().is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "Message is required"));
    }

    let outcome = state
        .registry
        .send_message(&id, &req.message)
        .await
        .map_err(supervisor_error)?;

    tracing::info!(session_id = %id, "API: sent message");
    Ok(Json(json!(outcome)))
}

/// GET /sessions/{id}/logs?lines=N&mobile=bool&formatted=bool
pub async fn get_logs(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult {
    let mode = DisplayMode::from_mobile_flag(query.mobile);
    let logs = state
        .registry
        .get_logs(&id, query.lines, mode)
        .await
        .map_err(supervisor_error)?;

    let mut body = json!({
        "logs": logs,
        "session_id": id,
        "mobile_optimized": query.mobile,
    });
    if query.formatted {
        body["formatted"] = json!(LogBuffer::format(&logs, query.lines));
    }
    Ok(Json(body))
}

/// DELETE /sessions/{id}
pub async fn terminate_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state
        .registry
        .terminate(&id)
        .await
        .map_err(supervisor_error)?;

    tracing::info!(session_id = %id, "API: terminated session");
    Ok(Json(json!({"status": "terminated", "session_id": id})))
}

/// GET /prompts - pending prompts across all sessions
pub async fn check_prompts(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let prompts = state.scanner.scan_all(&state.registry).await;
    Json(json!({ "prompts": prompts }))
}

/// POST /sessions/{id}/respond
pub async fn respond_to_prompt(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<RespondRequest>,
) -> ApiResult {
    if req.response.trim().is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "Response is required"));
    }

    state
        .registry
        .respond_to_prompt(&id, &req.response)
        .await
        .map_err(supervisor_error)?;

    tracing::info!(session_id = %id, "API: responded to prompt");
    Ok(Json(json!({"status": "response_sent", "session_id": id})))
}
