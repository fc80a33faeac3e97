//! Current-state read endpoint.
//!
//! Until the first payload arrives the endpoint answers `503` with a
//! `waiting` body instead of a zero-filled view.
use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use serde_json::json;
use tracing::debug;

use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/state", get(handler))
}

async fn handler(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    match state.view().await {
        Some(view) => (StatusCode::OK, Json(view)).into_response(),
        None => {
            debug!("GET /api/state - no telemetry yet");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "ok": false,
                    "status": "waiting",
                    "error": "no telemetry ingested yet",
                })),
            )
                .into_response()
        }
    }
}
