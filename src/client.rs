//! Weather client: fetches one raw observation per location.
//!
//! [`WeatherSource`] is the seam the scheduler depends on;
//! [`OpenWeatherClient`] is the HTTP implementation. The client owns the
//! per-request timeout and the retry/backoff loop and keeps no cache.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, warn};

use crate::error::FetchError;
use crate::location::Location;
use crate::models::RawResponse;
use crate::retry::{classify_error, classify_status, RetryDecision, RetryPolicy};

// ---

/// Anything that can produce a raw provider response for a location.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, location: &Location) -> Result<RawResponse, FetchError>;
}

/// OpenWeatherMap "current weather" client.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    http: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenWeatherClient {
    /// Build a client with a bounded per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: std::time::Duration,
        retry: RetryPolicy,
    ) -> Result<Self, FetchError> {
        // ---
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry,
        })
    }

    /// One HTTP attempt. `Err` carries the retry decision and a message.
    async fn attempt(&self, location: &Location) -> Result<String, AttemptError> {
        // ---
        let mut params = location.query_params();
        params.push(("appid", self.api_key.clone()));

        let response = self
            .http
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(AttemptError::from_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(AttemptError::from_transport)?;

        if !status.is_success() {
            return Err(AttemptError {
                decision: classify_status(status),
                status: Some(status.as_u16()),
                message: truncate_body(&body),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn fetch(&self, location: &Location) -> Result<RawResponse, FetchError> {
        // ---
        let mut attempt = 0u32;

        loop {
            debug!(location = %location, attempt = attempt + 1, "Fetching current weather");

            let err = match self.attempt(location).await {
                Ok(body) => {
                    if attempt > 0 {
                        debug!(location = %location, "Fetch succeeded after {} retries", attempt);
                    }
                    return Ok(RawResponse {
                        location: location.name.clone(),
                        body,
                    });
                }
                Err(err) => err,
            };

            if err.decision == RetryDecision::NoRetry {
                error!(location = %location, "Non-retryable provider error: {}", err);
                return Err(match err.status {
                    Some(status) => FetchError::Rejected {
                        status,
                        body: err.message,
                    },
                    None => FetchError::Request(err.message),
                });
            }

            if attempt >= self.retry.max_retries {
                error!(
                    location = %location,
                    "All {} attempts failed: {}",
                    attempt + 1,
                    err
                );
                return Err(FetchError::Exhausted {
                    attempts: attempt + 1,
                    last_error: err.to_string(),
                });
            }

            let delay = self.retry.delay_for_retry(attempt);
            warn!(
                location = %location,
                "Attempt {} of {} failed ({}), retrying in {:?}",
                attempt + 1,
                self.retry.max_retries + 1,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug)]
struct AttemptError {
    decision: RetryDecision,
    status: Option<u16>,
    message: String,
}

impl AttemptError {
    fn from_transport(e: reqwest::Error) -> Self {
        // ---
        // The request URL carries the API key.
        let e = e.without_url();
        Self {
            decision: classify_error(&e),
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "status {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

fn truncate_body(body: &str) -> String {
    // ---
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        let head: String = body.chars().take(MAX).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}
