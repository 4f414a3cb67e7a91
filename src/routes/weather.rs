use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::debug;

use super::{ApiError, AppState};
use crate::location::is_valid_name;
use crate::models::Observation;
use crate::store::TimeRange;

// ---

pub const DEFAULT_LIMIT: u32 = 1000;
pub const MAX_LIMIT: u32 = 10_000;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/weather", get(all_handler))
        .route("/weather/latest", get(latest_handler))
        .route("/weather/location/{name}", get(location_handler))
}

/// Query parameters for observation listings
#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    /// Range on `observed_at` (e.g., "2025-03-21T00:00:00Z,2025-03-22T00:00:00Z")
    timestamp_range: Option<String>,
    limit: Option<u32>,
}

impl ReadingsQuery {
    fn range(&self) -> Result<TimeRange, ApiError> {
        // ---
        match &self.timestamp_range {
            Some(text) => TimeRange::parse(text).map_err(ApiError::BadRequest),
            None => Ok(TimeRange::default()),
        }
    }

    fn limit(&self) -> Result<u32, ApiError> {
        // ---
        match self.limit {
            Some(0) => Err(ApiError::BadRequest("limit must be at least 1".to_string())),
            Some(n) if n > MAX_LIMIT => Err(ApiError::BadRequest(format!(
                "limit must not exceed {MAX_LIMIT}"
            ))),
            Some(n) => Ok(n),
            None => Ok(DEFAULT_LIMIT),
        }
    }
}

/// `GET /weather`
async fn all_handler(
    query: Result<Query<ReadingsQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Observation>>, ApiError> {
    // ---
    let Query(params) = query?;
    debug!("GET /weather {:?}", params);
    let observations = state.store.all(params.range()?, Some(params.limit()?)).await?;
    Ok(Json(observations))
}

/// `GET /weather/latest`
async fn latest_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Observation>>, ApiError> {
    // ---
    debug!("GET /weather/latest");
    Ok(Json(state.store.latest_per_location().await?))
}

/// `GET /weather/location/{name}`; unknown names yield `[]`.
async fn location_handler(
    Path(name): Path<String>,
    query: Result<Query<ReadingsQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Observation>>, ApiError> {
    // ---
    let Query(params) = query?;
    debug!("GET /weather/location/{} {:?}", name, params);
    if !is_valid_name(&name) {
        return Err(ApiError::BadRequest(format!(
            "'{name}' is not a valid location name"
        )));
    }
    let history = state
        .store
        .history(&name, params.range()?, Some(params.limit()?))
        .await?;
    Ok(Json(history))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_limit_defaults_and_bounds() {
        // ---
        let query = ReadingsQuery::default();
        assert_eq!(query.limit().unwrap(), DEFAULT_LIMIT);

        let query = ReadingsQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert!(query.limit().is_err());

        let query = ReadingsQuery {
            limit: Some(MAX_LIMIT + 1),
            ..Default::default()
        };
        assert!(query.limit().is_err());
    }

    #[test]
    fn test_malformed_range_is_bad_request() {
        // ---
        let query = ReadingsQuery {
            timestamp_range: Some("last week".to_string()),
            limit: None,
        };
        assert!(matches!(query.range(), Err(ApiError::BadRequest(_))));
    }
}
