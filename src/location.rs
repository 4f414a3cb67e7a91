//! Location registry.
//!
//! The registry is the static list of places the pipeline collects for. It is
//! parsed once from the `LOCATIONS` setting and never changes afterwards.
//! An entry is one of:
//! - `City,Country`      – looked up by name at the provider
//! - `lat,lon`           – looked up by coordinates
//! - `Name=<either>`     – same lookups, but stored under an explicit name

use std::{collections::HashSet, fmt};

use serde::Serialize;

use crate::error::ConfigError;

// ---

/// Longest location name accepted anywhere in the system.
pub const MAX_NAME_LEN: usize = 100;

/// How the provider is asked for a location.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LocationQuery {
    /// Free-text query such as `Colombo,Sri Lanka`.
    Name(String),
    Coordinates { lat: f64, lon: f64 },
}

/// One registered location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub name: String,
    pub query: LocationQuery,
}

impl Location {
    /// Parse a single registry entry.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        // ---
        let entry = entry.trim();

        let (name, query_text) = match entry.split_once('=') {
            Some((label, query)) => (label.trim(), query.trim()),
            None => (entry, entry),
        };

        if !is_valid_name(name) {
            return Err(invalid(format!("'{name}' is not a valid location name")));
        }
        if query_text.is_empty() {
            return Err(invalid(format!("location '{name}' has an empty query")));
        }

        let query = match parse_coordinates(query_text) {
            Some(Ok((lat, lon))) => LocationQuery::Coordinates { lat, lon },
            Some(Err(reason)) => return Err(invalid(format!("location '{name}': {reason}"))),
            None => LocationQuery::Name(query_text.to_string()),
        };

        Ok(Location {
            name: name.to_string(),
            query,
        })
    }

    /// Query parameters identifying this location at the provider.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        // ---
        match &self.query {
            LocationQuery::Name(q) => vec![("q", q.clone())],
            LocationQuery::Coordinates { lat, lon } => {
                vec![("lat", lat.to_string()), ("lon", lon.to_string())]
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Parse the `;`-separated `LOCATIONS` value into a registry.
///
/// Blank entries are skipped. An empty result or a repeated name is an error.
pub fn parse_registry(raw: &str) -> Result<Vec<Location>, ConfigError> {
    // ---
    let mut seen = HashSet::new();
    let mut locations = Vec::new();

    for entry in raw.split(';').filter(|e| !e.trim().is_empty()) {
        let location = Location::parse(entry)?;
        if !seen.insert(location.name.clone()) {
            return Err(invalid(format!("duplicate location '{}'", location.name)));
        }
        locations.push(location);
    }

    if locations.is_empty() {
        return Err(ConfigError::NoLocations);
    }
    Ok(locations)
}

/// Whether `name` is an acceptable location identifier.
///
/// Used both for the registry and for names arriving on the HTTP surface.
pub fn is_valid_name(name: &str) -> bool {
    // ---
    let len = name.chars().count();
    (1..=MAX_NAME_LEN).contains(&len)
        && name.trim() == name
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ' ' | ',' | '.' | '-' | '\'' | '_'))
}

/// Returns `None` when the text is not a numeric pair at all, and an error when
/// it is one but the values are outside the valid range.
fn parse_coordinates(text: &str) -> Option<Result<(f64, f64), String>> {
    // ---
    let (lat, lon) = text.split_once(',')?;
    let lat = lat.trim().parse::<f64>().ok()?;
    let lon = lon.trim().parse::<f64>().ok()?;

    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Some(Err(format!("latitude {lat} outside [-90, 90]")));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Some(Err(format!("longitude {lon} outside [-180, 180]")));
    }
    Some(Ok((lat, lon)))
}

fn invalid(reason: String) -> ConfigError {
    ConfigError::Invalid {
        var: "LOCATIONS",
        reason,
    }
}
