// src/routes/health.rs
//! Health check endpoint for the solar telemetry service.
//!
//! This module defines the `/health` route used by container orchestrators
//! and the dashboard to verify that the service is running. It is a sibling
//! module in the `routes` directory and follows the Explicit Module Boundary
//! Pattern (EMBP):
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::store::StateSummary;
use crate::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    summary: StateSummary,
}

/// Handle `GET /health`.
///
/// Always answers 200 while the process is alive; `has_data` tells callers
/// whether any telemetry has been ingested (or restored) yet.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        summary: state.summary().await,
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
