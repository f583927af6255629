use axum::extract::State;
use axum::http::StatusCode;

use crate::server::AppState;

/// GET /livez
pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// GET /readyz
///
/// Not ready while a start or stop is in flight.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.controller.is_busy() {
        (StatusCode::SERVICE_UNAVAILABLE, "transitioning")
    } else {
        (StatusCode::OK, "ok")
    }
}
