//! Start/stop control endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::lifecycle::{ControllerStatus, LifecycleError};
use crate::server::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct TransitionResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TransitionResponse {
    fn done(status: &'static str) -> Self {
        Self {
            status,
            error: None,
        }
    }

    fn failed(error: &LifecycleError) -> Self {
        Self {
            status: "error",
            error: Some(error.to_string()),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/start
pub async fn start(State(state): State<AppState>) -> Response {
    match state.controller.start().await {
        Ok(()) => (StatusCode::OK, Json(TransitionResponse::done("started"))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/stop
pub async fn stop(State(state): State<AppState>) -> Response {
    match state.controller.stop().await {
        Ok(()) => (StatusCode::OK, Json(TransitionResponse::done("stopped"))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<ControllerStatus> {
    Json(state.controller.status())
}

fn error_response(error: &LifecycleError) -> Response {
    let status = if error.is_retryable() {
        StatusCode::CONFLICT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(TransitionResponse::failed(error))).into_response()
}
