//! HTTP route handlers for the session API

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::AppState;
use crate::session::{ChatMessage, Session, SessionError, StateChange, Transition};

/// Error response for session API
#[derive(Debug, Serialize)]
pub struct SessionErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<SessionError> for SessionErrorResponse {
    fn from(e: SessionError) -> Self {
        let code = match &e {
            SessionError::NotFound(_) => "not_found",
            SessionError::InvalidSessionId(_) => "invalid_session_id",
            SessionError::TooManySessions(_) => "too_many_sessions",
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
        }
    }
}

impl IntoResponse for SessionErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "invalid_session_id" => StatusCode::BAD_REQUEST,
            "too_many_sessions" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Session state with its id and revision
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub rev: u64,
    pub state: Session,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub chats: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateEmailRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateEmailResponse {
    /// "success" or "error"
    pub status: String,
    pub message: String,
}

/// POST /api/sessions - Create a session
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionResponse>), SessionErrorResponse> {
    let (session_id, snapshot) = state.session_manager.create_session().await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id,
            rev: snapshot.rev,
            state: snapshot.state,
        }),
    ))
}

/// GET /api/sessions/:id - Current session state
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, SessionErrorResponse> {
    let snapshot = state.session_manager.get_session(&session_id).await?;
    Ok(Json(SessionResponse {
        session_id,
        rev: snapshot.rev,
        state: snapshot.state,
    }))
}

/// DELETE /api/sessions/:id - Drop a session
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, SessionErrorResponse> {
    state.session_manager.remove_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/sessions/:id/transitions - Apply a transition
pub async fn dispatch_transition(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(transition): Json<Transition>,
) -> Result<Json<StateChange>, SessionErrorResponse> {
    let change = state
        .session_manager
        .dispatch(&session_id, transition)
        .await?;
    Ok(Json(change))
}

/// GET /api/sessions/:id/history?limit=N - Most recent chats
pub async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, SessionErrorResponse> {
    let limit = query.limit.unwrap_or(state.history_window);
    let chats = state
        .session_manager
        .recent_chats(&session_id, limit)
        .await?;
    Ok(Json(HistoryResponse { session_id, chats }))
}

/// POST /api/validate_email - Check an address against the email policy
///
/// Always answers 200; the outcome is in `status`.
pub async fn validate_email(
    State(state): State<AppState>,
    Json(request): Json<ValidateEmailRequest>,
) -> Json<ValidateEmailResponse> {
    let email = request.email.unwrap_or_default();
    if state.email_policy.is_valid(&email) {
        info!("Email validated: {}", email);
        Json(ValidateEmailResponse {
            status: "success".to_string(),
            message: "Email validated successfully!".to_string(),
        })
    } else {
        warn!("Invalid email format: {}", email);
        Json(ValidateEmailResponse {
            status: "error".to_string(),
            message: "Invalid email format.".to_string(),
        })
    }
}

/// Create router for the session API, to be nested under `/api`
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/transitions", post(dispatch_transition))
        .route("/sessions/:id/history", get(get_history))
        .route("/validate_email", post(validate_email))
}
