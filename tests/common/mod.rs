//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Body, http::Request, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use weatherflow::config::{Config, DEFAULT_API_URL};
use weatherflow::location::parse_registry;
use weatherflow::{
    AppContext, FetchError, Location, ObservationStore, RawResponse, TemperatureBounds,
    WeatherSource,
};

// ---

/// Config over the given registry with fast retries and a short interval.
pub fn test_config(registry: &str) -> Config {
    // ---
    Config {
        api_key: Some("test-key".to_string()),
        api_url: DEFAULT_API_URL.to_string(),
        api_timeout: Duration::from_secs(5),
        locations: parse_registry(registry).unwrap(),
        db_url: "sqlite::memory:".to_string(),
        db_pool_max: 1,
        schedule_interval: Duration::from_millis(50),
        max_retries: 3,
        retry_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        temperature_bounds: TemperatureBounds::default(),
        staleness_threshold: Duration::from_secs(90 * 60),
        max_concurrent_fetches: 2,
        storage_degraded_after: 2,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
    }
}

pub async fn test_context(registry: &str) -> AppContext {
    // ---
    let store = ObservationStore::in_memory().await.unwrap();
    AppContext::with_store(test_config(registry), store)
}

/// A provider body in the OpenWeatherMap shape, temperatures in Kelvin.
pub fn owm_body(temp_k: f64, observed_at: DateTime<Utc>) -> Value {
    // ---
    json!({
        "coord": {"lon": 80.6337, "lat": 7.2955},
        "weather": [{"id": 803, "main": "Clouds", "description": "broken clouds", "icon": "04d"}],
        "main": {
            "temp": temp_k,
            "feels_like": temp_k + 2.0,
            "pressure": 1011,
            "humidity": 78
        },
        "visibility": 10000,
        "wind": {"speed": 2.57, "deg": 240},
        "clouds": {"all": 75},
        "dt": observed_at.timestamp(),
        "name": "Kandy",
        "cod": 200
    })
}

/// Send a GET through the router without binding a socket.
pub async fn get_json(app: Router, uri: &str) -> (u16, Value) {
    // ---
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// In-process source that serves a fresh, valid body for every location.
#[derive(Default)]
pub struct StaticSource {
    pub calls: AtomicUsize,
}

impl StaticSource {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherSource for StaticSource {
    async fn fetch(&self, location: &Location) -> Result<RawResponse, FetchError> {
        // ---
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawResponse {
            location: location.name.clone(),
            body: owm_body(300.15, Utc::now()).to_string(),
        })
    }
}
