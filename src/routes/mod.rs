//! Routes gateway (EMBP): each sibling module exports a subrouter and this
//! file merges them, so `main.rs` only ever calls [`router`].
use axum::{extract::DefaultBodyLimit, Router};

use crate::AppState;

mod health;
mod ingest;
mod state;

// ---

pub fn router(app_state: AppState) -> Router {
    // ---
    let body_limit = app_state.config().max_body_bytes;

    Router::new()
        .merge(ingest::router())
        .merge(state::router())
        .merge(health::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}
