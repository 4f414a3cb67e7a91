//! Data models for the weather pipeline.
//!
//! - [`RawResponse`]: verbatim provider body for one location, as fetched
//! - [`ProviderPayload`]: the typed shape that body must deserialize into
//! - [`Observation`]: canonical, validated record; immutable once stored
//! - [`ObservationRow`]: storage representation (timestamps as epoch millis)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

// ---

/// Provider response for one location, exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// Registered name of the location this body was fetched for.
    pub location: String,
    pub body: String,
}

/// OpenWeatherMap "current weather" response.
///
/// Required fields are plain members; anything the provider may omit is an
/// `Option`. A body that does not fit this shape is rejected by the
/// normalizer instead of travelling further as untyped JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPayload {
    /// Observation time, unix seconds.
    pub dt: i64,
    pub main: ProviderMain,
    pub wind: ProviderWind,
    #[serde(default)]
    pub weather: Vec<ProviderCondition>,
    pub coord: Option<ProviderCoord>,
    pub visibility: Option<i64>,
    pub clouds: Option<ProviderClouds>,
    pub rain: Option<ProviderPrecipitation>,
    pub snow: Option<ProviderPrecipitation>,
}

/// Temperatures are Kelvin (no `units` parameter is sent).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMain {
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: i64,
    pub pressure: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderWind {
    pub speed: f64,
    pub deg: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCondition {
    pub main: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCoord {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderClouds {
    pub all: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPrecipitation {
    #[serde(rename = "1h")]
    pub one_hour: Option<f64>,
}

/// One normalized weather reading for one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    // ---
    pub location: String,
    /// Physical time of the reading, as reported by the provider.
    pub observed_at: DateTime<Utc>,
    /// When the pipeline retrieved it.
    pub fetched_at: DateTime<Utc>,
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub humidity_pct: i32,
    pub pressure_hpa: i32,
    pub wind_speed_ms: f64,
    pub wind_deg: i32,
    pub condition_main: String,
    pub condition_description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub visibility_m: Option<i32>,
    pub clouds_pct: Option<i32>,
    pub rain_1h_mm: Option<f64>,
    pub snow_1h_mm: Option<f64>,
    /// Verbatim provider body; never parsed again after ingestion.
    pub raw_payload: String,
}

/// Row shape of the `observations` table.
#[derive(Debug, sqlx::FromRow)]
pub struct ObservationRow {
    pub id: i64,
    pub location: String,
    pub observed_at: i64,
    pub fetched_at: i64,
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub humidity_pct: i32,
    pub pressure_hpa: i32,
    pub wind_speed_ms: f64,
    pub wind_deg: i32,
    pub condition_main: String,
    pub condition_description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub visibility_m: Option<i32>,
    pub clouds_pct: Option<i32>,
    pub rain_1h_mm: Option<f64>,
    pub snow_1h_mm: Option<f64>,
    pub raw_payload: String,
}

impl TryFrom<ObservationRow> for Observation {
    type Error = StorageError;

    fn try_from(row: ObservationRow) -> Result<Self, Self::Error> {
        // ---
        let observed_at = from_millis(row.observed_at, row.id, "observed_at")?;
        let fetched_at = from_millis(row.fetched_at, row.id, "fetched_at")?;

        Ok(Observation {
            location: row.location,
            observed_at,
            fetched_at,
            temperature_c: row.temperature_c,
            feels_like_c: row.feels_like_c,
            humidity_pct: row.humidity_pct,
            pressure_hpa: row.pressure_hpa,
            wind_speed_ms: row.wind_speed_ms,
            wind_deg: row.wind_deg,
            condition_main: row.condition_main,
            condition_description: row.condition_description,
            latitude: row.latitude,
            longitude: row.longitude,
            visibility_m: row.visibility_m,
            clouds_pct: row.clouds_pct,
            rain_1h_mm: row.rain_1h_mm,
            snow_1h_mm: row.snow_1h_mm,
            raw_payload: row.raw_payload,
        })
    }
}

fn from_millis(ms: i64, id: i64, column: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Corrupt(format!("row {id}: {column}={ms} is not a timestamp")))
}
