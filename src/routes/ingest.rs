//! Telemetry ingest endpoint.
//!
//! Receives the raw body from the sensor unit and hands it to the store; all
//! validation happens in the ingestion pipeline.
use axum::{
    body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::post, Json,
    Router,
};
use serde_json::json;
use tracing::{debug, info};

use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/ingest", post(handler))
        .route("/api/telemetry", post(handler))
}

async fn handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    // ---
    debug!("POST /api/ingest - {} bytes", body.len());

    match state.ingest(&body).await {
        Ok(ack) => {
            info!(bytes = ack.bytes, "telemetry accepted");
            (StatusCode::OK, Json(ack)).into_response()
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}
