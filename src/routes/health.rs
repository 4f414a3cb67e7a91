// src/routes/health.rs
//! Health and freshness endpoint for the weather pipeline.
//!
//! This module defines the `/health` route used by the dashboard and by
//! container orchestrators to see whether collection is keeping up. It is a
//! sibling module in the `routes` directory and follows the Explicit Module
//! Boundary Pattern (EMBP):
//! - Internal to this file: the endpoint handler
//! - Exports to the gateway (`mod.rs`): a subrouter containing `/health`

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;

use super::AppState;
use crate::health::{self, HealthReport};

/// Handle `GET /health`.
///
/// Reports the last successful cycle time, the age of every registered
/// location's newest observation and an overall `fresh` flag. Always
/// answers 200; the verdict is in the body.
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    // ---
    let status = state.status.read().await.clone();
    let report = health::check(
        &state.store,
        &state.locations,
        &status,
        state.health,
        Utc::now(),
    )
    .await;
    Json(report)
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
