//! Read-only HTTP surface over the observation store.
//!
//! Gateway for the route modules (EMBP): each sibling exports a subrouter and
//! this module merges them and attaches the shared [`AppState`]. No route
//! mutates data.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::health::HealthPolicy;
use crate::location::Location;
use crate::scheduler::StatusHandle;
use crate::store::ObservationStore;

mod health;
mod weather;

// ---

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub store: ObservationStore,
    pub locations: Arc<Vec<Location>>,
    pub status: StatusHandle,
    pub health: HealthPolicy,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(weather::router())
        .merge(health::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the API address; must succeed before the scheduler starts.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    // ---
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve the API on `listener` until `stop` turns `true` or its sender is dropped.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut stop: watch::Receiver<bool>,
) -> std::io::Result<()> {
    // ---
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        })
        .await?;

    info!("API server stopped");
    Ok(())
}

/// Errors a route can answer with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("storage unavailable")]
    Storage(#[from] crate::error::StorageError),
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(e) => {
                tracing::error!("Store read failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
