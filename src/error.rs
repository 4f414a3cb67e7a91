//! Error taxonomy for the collection pipeline.
//!
//! Each stage owns one error type so the scheduler can turn a failure into
//! the matching per-location outcome without inspecting strings:
//! - [`ConfigError`]     – startup only, fatal
//! - [`FetchError`]      – weather client, after retries are exhausted
//! - [`ValidationError`] – normalizer, permanent for that payload
//! - [`StorageError`]    – observation store, possibly retryable

use thiserror::Error;

// ---

/// Invalid or missing configuration detected before any cycle runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in .env or environment")]
    Missing(&'static str),

    #[error("Invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("No locations configured; set LOCATIONS to a ';'-separated list")]
    NoLocations,

    #[error("OWM_API_KEY is required to collect observations")]
    MissingCredential,
}

/// Terminal failure of the weather client for one location.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transient failures kept happening until the retry budget ran out.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// Provider answered with a status that retrying cannot fix.
    #[error("provider rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("could not build provider request: {0}")]
    Request(String),
}

/// A provider payload that cannot become a canonical observation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("malformed provider payload: {0}")]
    Malformed(String),

    #[error("missing field {0}")]
    Missing(&'static str),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("{field} is not a finite number: {value}")]
    NonFinite { field: &'static str, value: String },
}

impl ValidationError {
    /// Name of the offending field, if the error is tied to one.
    pub fn field(&self) -> Option<&'static str> {
        // ---
        match self {
            ValidationError::Malformed(_) => None,
            ValidationError::Missing(field)
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::NonFinite { field, .. } => Some(field),
        }
    }
}

/// Failure reading from or writing to the observation store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("could not prepare storage location: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed (lock contention,
    /// pool exhaustion) as opposed to a permanent failure.
    pub fn is_retryable(&self) -> bool {
        // ---
        match self {
            StorageError::Database(sqlx::Error::PoolTimedOut) => true,
            StorageError::Database(sqlx::Error::Database(db)) => {
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes
                db.code()
                    .and_then(|c| c.parse::<i32>().ok())
                    .is_some_and(|code| matches!(code & 0xff, 5 | 6))
            }
            StorageError::Database(sqlx::Error::Io(_)) => true,
            _ => false,
        }
    }
}
