//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Operators connect to `/ws` and speak the line protocol. `/healthz` reports
//! liveness and the hub's live counts. Every HTTP request, including the
//! websocket upgrade, is traced by `TraceLayer`.

pub mod ws;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 503 once the hub loop is gone.
async fn healthz(State(state): State<AppState>) -> Response {
    match state.hub.stats().await {
        Some(stats) => Json(stats).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
