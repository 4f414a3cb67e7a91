//! Process-scoped application context.
//!
//! Built once at startup and handed to the scheduler and the serving API:
//! `init` opens the store and applies the schema, `shutdown` closes it after
//! both have stopped. Nothing else holds global state.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::client::{OpenWeatherClient, WeatherSource};
use crate::config::Config;
use crate::error::{ConfigError, StorageError};
use crate::health::{self, HealthPolicy, HealthReport};
use crate::retry::RetryPolicy;
use crate::routes::AppState;
use crate::scheduler::{Scheduler, SchedulerSettings, SchedulerStatus, StatusHandle};
use crate::store::ObservationStore;

// ---

pub struct AppContext {
    pub config: Config,
    pub store: ObservationStore,
    pub status: StatusHandle,
}

impl AppContext {
    /// Open the store described by `config` and apply the schema.
    pub async fn init(config: Config) -> Result<Self, StorageError> {
        // ---
        let store = ObservationStore::open(&config.db_url, config.db_pool_max).await?;
        Ok(Self::with_store(config, store))
    }

    /// Wrap an already opened store.
    pub fn with_store(config: Config, store: ObservationStore) -> Self {
        Self {
            config,
            store,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
        }
    }

    /// Scheduler backed by the OpenWeatherMap client. Requires the API key.
    pub fn scheduler(&self) -> Result<Scheduler, ConfigError> {
        // ---
        let api_key = self.config.require_api_key()?;
        let retry = RetryPolicy::new(
            self.config.max_retries,
            self.config.retry_delay,
            self.config.retry_max_delay,
        );
        let client = OpenWeatherClient::new(
            self.config.api_url.clone(),
            api_key,
            self.config.api_timeout,
            retry,
        )
        .map_err(|e| ConfigError::Invalid {
            var: "OWM_API_BASE_URL",
            reason: e.to_string(),
        })?;

        self.scheduler_with_source(Arc::new(client))
    }

    /// Scheduler backed by an arbitrary weather source.
    pub fn scheduler_with_source(
        &self,
        source: Arc<dyn WeatherSource>,
    ) -> Result<Scheduler, ConfigError> {
        // ---
        Scheduler::new(
            self.config.locations.clone(),
            source,
            self.store.clone(),
            SchedulerSettings {
                bounds: self.config.temperature_bounds,
                interval: self.config.schedule_interval,
                max_concurrency: self.config.max_concurrent_fetches,
            },
            Arc::clone(&self.status),
        )
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            staleness_threshold: self.config.staleness_threshold,
            storage_degraded_after: self.config.storage_degraded_after,
        }
    }

    /// State for the read-only HTTP routes.
    pub fn api_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            locations: Arc::new(self.config.locations.clone()),
            status: Arc::clone(&self.status),
            health: self.health_policy(),
        }
    }

    pub async fn health(&self) -> HealthReport {
        // ---
        let status = self.status.read().await.clone();
        health::check(
            &self.store,
            &self.config.locations,
            &status,
            self.health_policy(),
            Utc::now(),
        )
        .await
    }

    /// Close the store. Call after the scheduler loop and server have stopped.
    pub async fn shutdown(self) {
        self.store.close().await;
        tracing::info!("Observation store closed");
    }
}
