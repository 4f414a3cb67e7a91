//! `weatherflow`: periodic weather observation collection.
//!
//! Pipeline shape, one pass per registered location and cycle:
//! registry → client (fetch with retry) → normalizer → append-only store,
//! with a read-only HTTP API over the store.
//!
//! This crate follows the Explicit Module Boundary Pattern (EMBP): modules are
//! declared here and their public types re-exported, so siblings and the
//! binary only ever import from the crate root.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod location;
pub mod models;
pub mod normalize;
pub mod retry;
pub mod routes;
pub mod scheduler;
pub mod schema;
pub mod store;

pub use client::{OpenWeatherClient, WeatherSource};
pub use config::{Config, TemperatureBounds};
pub use context::AppContext;
pub use error::{ConfigError, FetchError, StorageError, ValidationError};
pub use health::{HealthPolicy, HealthReport, HealthStatus};
pub use location::{Location, LocationQuery};
pub use models::{Observation, RawResponse};
pub use normalize::normalize;
pub use retry::RetryPolicy;
pub use routes::{router, AppState};
pub use scheduler::{
    CycleReport, LocationOutcome, Scheduler, SchedulerSettings, SchedulerState, SchedulerStatus,
    StatusHandle,
};
pub use store::{ObservationStore, TimeRange};
