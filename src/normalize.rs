//! Validation and normalization of provider responses.
//!
//! [`normalize`] is a pure function: it reads nothing but its arguments, and
//! `fetched_at` is supplied by the caller. The same body, location and bounds
//! always produce the same [`Observation`].

use chrono::{DateTime, Utc};

use crate::config::TemperatureBounds;
use crate::error::ValidationError;
use crate::models::{Observation, ProviderPayload, RawResponse};

// ---

/// Offset between Kelvin and Celsius.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Turn a raw provider response into a canonical observation, or explain
/// which field made it unacceptable.
pub fn normalize(
    raw: &RawResponse,
    fetched_at: DateTime<Utc>,
    bounds: &TemperatureBounds,
) -> Result<Observation, ValidationError> {
    // ---
    let payload: ProviderPayload =
        serde_json::from_str(&raw.body).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    let observed_at = DateTime::from_timestamp(payload.dt, 0).ok_or_else(|| {
        ValidationError::OutOfRange {
            field: "observed_at",
            value: payload.dt.to_string(),
        }
    })?;

    let temperature_c = celsius("temperature_c", payload.main.temp, bounds)?;
    let feels_like_c = celsius("feels_like_c", payload.main.feels_like, bounds)?;

    let humidity_pct = int_in("humidity_pct", payload.main.humidity, 0, 100)?;
    let pressure_hpa = int_in("pressure_hpa", payload.main.pressure, 1, i32::MAX as i64)?;

    let wind_speed_ms = finite("wind_speed_ms", payload.wind.speed)?;
    if wind_speed_ms < 0.0 {
        return Err(out_of_range("wind_speed_ms", wind_speed_ms));
    }
    let wind_deg = payload.wind.deg.ok_or(ValidationError::Missing("wind_deg"))?;
    let wind_deg = int_in("wind_deg", wind_deg, 0, 360)?;

    let condition = payload
        .weather
        .first()
        .ok_or(ValidationError::Missing("condition_main"))?;

    let (latitude, longitude) = match &payload.coord {
        Some(coord) => (
            Some(finite("latitude", coord.lat)?),
            Some(finite("longitude", coord.lon)?),
        ),
        None => (None, None),
    };

    let visibility_m = payload
        .visibility
        .map(|v| int_in("visibility_m", v, 0, i32::MAX as i64))
        .transpose()?;
    let clouds_pct = payload
        .clouds
        .as_ref()
        .map(|c| int_in("clouds_pct", c.all, 0, 100))
        .transpose()?;
    let rain_1h_mm = precipitation("rain_1h_mm", payload.rain.as_ref().and_then(|r| r.one_hour))?;
    let snow_1h_mm = precipitation("snow_1h_mm", payload.snow.as_ref().and_then(|s| s.one_hour))?;

    Ok(Observation {
        location: raw.location.clone(),
        observed_at,
        fetched_at,
        temperature_c,
        feels_like_c,
        humidity_pct,
        pressure_hpa,
        wind_speed_ms,
        wind_deg,
        condition_main: condition.main.trim().to_string(),
        condition_description: condition.description.trim().to_string(),
        latitude,
        longitude,
        visibility_m,
        clouds_pct,
        rain_1h_mm,
        snow_1h_mm,
        raw_payload: raw.body.clone(),
    })
}

/// Kelvin reading converted to Celsius and checked against the bounds.
fn celsius(
    field: &'static str,
    kelvin: f64,
    bounds: &TemperatureBounds,
) -> Result<f64, ValidationError> {
    // ---
    let value = finite(field, kelvin - KELVIN_OFFSET)?;
    // Two decimals are all the provider resolution carries.
    let value = (value * 100.0).round() / 100.0;
    if !bounds.contains(value) {
        return Err(out_of_range(field, value));
    }
    Ok(value)
}

fn finite(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NonFinite {
            field,
            value: value.to_string(),
        })
    }
}

fn int_in(field: &'static str, value: i64, min: i64, max: i64) -> Result<i32, ValidationError> {
    // ---
    if !(min..=max).contains(&value) {
        return Err(out_of_range(field, value));
    }
    i32::try_from(value).map_err(|_| out_of_range(field, value))
}

fn precipitation(field: &'static str, value: Option<f64>) -> Result<Option<f64>, ValidationError> {
    // ---
    match value {
        Some(mm) => {
            let mm = finite(field, mm)?;
            if mm < 0.0 {
                return Err(out_of_range(field, mm));
            }
            Ok(Some(mm))
        }
        None => Ok(None),
    }
}

fn out_of_range(field: &'static str, value: impl ToString) -> ValidationError {
    ValidationError::OutOfRange {
        field,
        value: value.to_string(),
    }
}
