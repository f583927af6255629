use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::lifecycle::LifecycleController;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub controller: LifecycleController,
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let api = Router::new()
        .route("/start", post(handlers::start))
        .route("/stop", post(handlers::stop))
        .route("/status", get(handlers::status));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .nest("/api", api)
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}
