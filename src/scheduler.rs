//! Scheduler: drives fetch → validate → store cycles.
//!
//! States: `Idle → Running(cycle) → Idle` in continuous mode, or
//! `Running(cycle) → Done` for a single run. A cycle always completes and
//! reports one outcome per registered location; failures of one location
//! never stop the others.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::client::WeatherSource;
use crate::config::TemperatureBounds;
use crate::error::{ConfigError, StorageError};
use crate::location::Location;
use crate::models::{Observation, RawResponse};
use crate::normalize::normalize;
use crate::store::ObservationStore;

// ---

/// Attempts per observation write before the location counts as `StorageFailed`.
pub const STORAGE_ATTEMPTS: u32 = 3;
const STORAGE_RETRY_PAUSE: Duration = Duration::from_millis(200);

/// Where the scheduler is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Running {
        cycle_id: Uuid,
    },
    /// Single-shot run finished.
    Done,
    /// Continuous loop exited on a stop request.
    Stopped,
}

/// Shared, read-mostly view of scheduler progress for health reporting.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub cycles_run: u64,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    pub last_cycle_finished_at: Option<DateTime<Utc>>,
    /// Start of the last cycle that stored at least one observation.
    pub last_successful_cycle_at: Option<DateTime<Utc>>,
    /// Consecutive cycles in which at least one write failed.
    pub consecutive_storage_failures: u32,
}

pub type StatusHandle = Arc<RwLock<SchedulerStatus>>;

/// What happened to one location during one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LocationOutcome {
    Stored {
        observed_at: DateTime<Utc>,
    },
    FetchFailed {
        error: String,
    },
    ValidationFailed {
        field: Option<&'static str>,
        error: String,
    },
    StorageFailed {
        error: String,
    },
}

impl LocationOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, LocationOutcome::Stored { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            LocationOutcome::Stored { .. } => "stored",
            LocationOutcome::FetchFailed { .. } => "fetch failed",
            LocationOutcome::ValidationFailed { .. } => "validation failed",
            LocationOutcome::StorageFailed { .. } => "storage failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationResult {
    pub location: String,
    #[serde(flatten)]
    pub outcome: LocationOutcome,
}

/// Per-location result set of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<LocationResult>,
}

impl CycleReport {
    pub fn stored_count(&self) -> usize {
        self.results.iter().filter(|r| !r.outcome.is_failure()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.stored_count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }

    pub fn storage_failures(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, LocationOutcome::StorageFailed { .. }))
            .count()
    }

    /// Outcome for a location by name.
    pub fn outcome(&self, location: &str) -> Option<&LocationOutcome> {
        self.results
            .iter()
            .find(|r| r.location == location)
            .map(|r| &r.outcome)
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let elapsed = (self.finished_at - self.started_at).num_milliseconds();
        writeln!(
            f,
            "Cycle {} started {}: {} stored, {} failed ({} ms)",
            self.cycle_id,
            self.started_at.to_rfc3339(),
            self.stored_count(),
            self.failed_count(),
            elapsed
        )?;
        for r in &self.results {
            match &r.outcome {
                LocationOutcome::Stored { observed_at } => writeln!(
                    f,
                    "  {:<30} {:<18} observed {}",
                    r.location,
                    r.outcome.label(),
                    observed_at.to_rfc3339()
                )?,
                LocationOutcome::FetchFailed { error }
                | LocationOutcome::ValidationFailed { error, .. }
                | LocationOutcome::StorageFailed { error } => writeln!(
                    f,
                    "  {:<30} {:<18} {}",
                    r.location,
                    r.outcome.label(),
                    error
                )?,
            }
        }
        Ok(())
    }
}

/// Tunables the scheduler needs besides its collaborators.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub bounds: TemperatureBounds,
    pub interval: Duration,
    pub max_concurrency: usize,
}

/// Runs collection cycles over the registered locations.
pub struct Scheduler {
    locations: Vec<Location>,
    source: Arc<dyn WeatherSource>,
    store: ObservationStore,
    settings: SchedulerSettings,
    status: StatusHandle,
}

impl Scheduler {
    /// Fails when no locations are registered: no cycle could ever do anything.
    pub fn new(
        locations: Vec<Location>,
        source: Arc<dyn WeatherSource>,
        store: ObservationStore,
        settings: SchedulerSettings,
        status: StatusHandle,
    ) -> Result<Self, ConfigError> {
        // ---
        if locations.is_empty() {
            return Err(ConfigError::NoLocations);
        }
        let settings = SchedulerSettings {
            max_concurrency: settings.max_concurrency.max(1),
            ..settings
        };
        Ok(Self {
            locations,
            source,
            store,
            settings,
            status,
        })
    }

    pub fn status(&self) -> StatusHandle {
        Arc::clone(&self.status)
    }

    /// Run exactly one cycle and mark the scheduler `Done`.
    pub async fn run_once(&self) -> CycleReport {
        // ---
        let report = self.run_cycle().await;
        self.status.write().await.state = SchedulerState::Done;
        report
    }

    /// Run cycles until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Cycle starts are `interval` apart; a cycle that overruns the interval
    /// is followed immediately by the next one. A stop request never
    /// interrupts a running cycle. Returns the number of cycles run.
    pub async fn run_scheduled(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        // ---
        info!(
            interval = ?self.settings.interval,
            locations = self.locations.len(),
            "Scheduler started"
        );
        let mut cycles = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            self.run_cycle().await;
            cycles += 1;

            let wait = remaining_interval(started.elapsed(), self.settings.interval);
            if wait.is_zero() {
                warn!(
                    interval = ?self.settings.interval,
                    elapsed = ?started.elapsed(),
                    "Cycle overran the interval; starting the next one now"
                );
            }
            if wait_or_stop(wait, &mut shutdown).await {
                break;
            }
        }

        self.status.write().await.state = SchedulerState::Stopped;
        info!(cycles, "Scheduler stopped");
        cycles
    }

    /// One pass over every registered location.
    pub async fn run_cycle(&self) -> CycleReport {
        // ---
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", %cycle_id);

        async move {
            let started_at = Utc::now();
            {
                let mut status = self.status.write().await;
                status.state = SchedulerState::Running { cycle_id };
                status.last_cycle_started_at = Some(started_at);
            }
            info!(locations = self.locations.len(), "Cycle started");

            // `buffered` keeps results in registry order.
            let pending: Vec<_> = self
                .locations
                .iter()
                .map(|location| self.process_location(location))
                .collect();
            let results: Vec<LocationResult> = stream::iter(pending)
                .buffered(self.settings.max_concurrency)
                .collect()
                .await;

            let report = CycleReport {
                cycle_id,
                started_at,
                finished_at: Utc::now(),
                results,
            };
            self.record(&report).await;

            if report.has_failures() {
                warn!(
                    stored = report.stored_count(),
                    failed = report.failed_count(),
                    "Cycle finished with failures"
                );
            } else {
                info!(stored = report.stored_count(), "Cycle finished");
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn process_location(&self, location: &Location) -> LocationResult {
        // ---
        let outcome = self
            .collect(location)
            .instrument(info_span!("location", location = %location))
            .await;
        LocationResult {
            location: location.name.clone(),
            outcome,
        }
    }

    async fn collect(&self, location: &Location) -> LocationOutcome {
        // ---
        let raw = match self.source.fetch(location).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Fetch failed: {}", e);
                return LocationOutcome::FetchFailed {
                    error: e.to_string(),
                };
            }
        };
        // Stored under the registered name, whatever the source reported.
        let raw = RawResponse {
            location: location.name.clone(),
            ..raw
        };

        let observation = match normalize(&raw, Utc::now(), &self.settings.bounds) {
            Ok(obs) => obs,
            Err(e) => {
                warn!(field = e.field().unwrap_or("-"), "Validation failed: {}", e);
                return LocationOutcome::ValidationFailed {
                    field: e.field(),
                    error: e.to_string(),
                };
            }
        };

        match self.append_with_retry(&observation).await {
            Ok(()) => {
                info!(observed_at = %observation.observed_at, "Observation stored");
                LocationOutcome::Stored {
                    observed_at: observation.observed_at,
                }
            }
            Err(e) => {
                error!("Storing observation failed: {}", e);
                LocationOutcome::StorageFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn append_with_retry(&self, observation: &Observation) -> Result<(), StorageError> {
        // ---
        let mut attempt = 1;
        loop {
            match self.store.append(observation).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < STORAGE_ATTEMPTS => {
                    warn!(attempt, "Retryable storage error: {}", e);
                    tokio::time::sleep(STORAGE_RETRY_PAUSE).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn record(&self, report: &CycleReport) {
        // ---
        let mut status = self.status.write().await;
        status.state = SchedulerState::Idle;
        status.cycles_run += 1;
        status.last_cycle_finished_at = Some(report.finished_at);

        if report.stored_count() > 0 {
            status.last_successful_cycle_at = Some(report.started_at);
        }
        if report.storage_failures() > 0 {
            status.consecutive_storage_failures += 1;
        } else if report.stored_count() > 0 {
            status.consecutive_storage_failures = 0;
        }
    }
}

/// Time left until the next cycle may start, given how long the last one took.
pub fn remaining_interval(elapsed: Duration, interval: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Sleep for `wait`, returning early with `true` if a stop is requested.
async fn wait_or_stop(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    // ---
    let deadline = Instant::now() + wait;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return *shutdown.borrow(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_remaining_interval() {
        // ---
        let hour = Duration::from_secs(3600);
        assert_eq!(
            remaining_interval(Duration::from_secs(600), hour),
            Duration::from_secs(3000)
        );
        // Overrun: start the next cycle immediately.
        assert_eq!(
            remaining_interval(Duration::from_secs(4000), hour),
            Duration::ZERO
        );
        assert_eq!(remaining_interval(hour, hour), Duration::ZERO);
    }

    #[test]
    fn test_report_counts_and_summary() {
        // ---
        let started_at = Utc::now();
        let report = CycleReport {
            cycle_id: Uuid::nil(),
            started_at,
            finished_at: started_at,
            results: vec![
                LocationResult {
                    location: "Kandy".to_string(),
                    outcome: LocationOutcome::Stored {
                        observed_at: started_at,
                    },
                },
                LocationResult {
                    location: "Colombo".to_string(),
                    outcome: LocationOutcome::FetchFailed {
                        error: "gave up after 4 attempts".to_string(),
                    },
                },
                LocationResult {
                    location: "Galle".to_string(),
                    outcome: LocationOutcome::StorageFailed {
                        error: "database is locked".to_string(),
                    },
                },
            ],
        };

        assert_eq!(report.stored_count(), 1);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(report.storage_failures(), 1);
        assert!(report.has_failures());
        assert!(matches!(
            report.outcome("Colombo"),
            Some(LocationOutcome::FetchFailed { .. })
        ));

        let summary = report.to_string();
        assert!(summary.contains("1 stored, 2 failed"));
        assert!(summary.contains("fetch failed"));
        assert!(summary.contains("database is locked"));
    }

    #[tokio::test]
    async fn test_wait_or_stop_returns_on_stop_signal() {
        // ---
        let (tx, mut rx) = watch::channel(false);
        let waiter =
            tokio::spawn(async move { wait_or_stop(Duration::from_secs(3600), &mut rx).await });

        tx.send(true).unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_wait_or_stop_elapses_without_signal() {
        // ---
        let (_tx, mut rx) = watch::channel(false);
        let stopped = wait_or_stop(Duration::from_millis(10), &mut rx).await;
        assert!(!stopped);
    }
}
