//! Freshness and health assessment.
//!
//! Shared by the `/health` route and the `health-check` command so both
//! report the same payload.

use std::{collections::BTreeMap, collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::location::Location;
use crate::scheduler::SchedulerStatus;
use crate::store::ObservationStore;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// At least one registered location is older than the threshold.
    Stale,
    /// Storage is failing persistently or cannot be read.
    Degraded,
}

/// Freshness of one registered location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFreshness {
    pub last_success_at: Option<DateTime<Utc>>,
    pub freshness_seconds: Option<i64>,
}

/// JSON body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub fresh: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub per_location: BTreeMap<String, LocationFreshness>,
    pub stale_locations: Vec<String>,
    pub staleness_threshold_seconds: u64,
    pub checked_at: DateTime<Utc>,
}

/// Thresholds used to judge health.
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub staleness_threshold: Duration,
    /// Consecutive cycles with storage failures that make the service degraded.
    pub storage_degraded_after: u32,
}

/// Build a report from store contents and in-process scheduler status.
///
/// When this process has not completed a successful cycle itself (API-only
/// or CLI processes), `lastCycleAt` falls back to the newest `fetched_at` in
/// the store. A store that cannot be read yields a degraded report.
pub async fn check(
    store: &ObservationStore,
    locations: &[Location],
    status: &SchedulerStatus,
    policy: HealthPolicy,
    now: DateTime<Utc>,
) -> HealthReport {
    // ---
    let storage_degraded = policy.storage_degraded_after > 0
        && status.consecutive_storage_failures >= policy.storage_degraded_after;

    let last_success = match store.last_success_per_location().await {
        Ok(map) => map,
        Err(e) => {
            error!("Health check could not read the store: {}", e);
            return assess(
                locations,
                &HashMap::new(),
                status.last_successful_cycle_at,
                true,
                policy,
                now,
            );
        }
    };

    let last_cycle_at = match status.last_successful_cycle_at {
        Some(at) => Some(at),
        None => store.last_fetched_at().await.unwrap_or_else(|e| {
            warn!("Could not read last fetch time: {}", e);
            None
        }),
    };

    assess(
        locations,
        &last_success,
        last_cycle_at,
        storage_degraded,
        policy,
        now,
    )
}

/// Pure health decision over already-loaded facts.
pub fn assess(
    locations: &[Location],
    last_success: &HashMap<String, DateTime<Utc>>,
    last_cycle_at: Option<DateTime<Utc>>,
    storage_degraded: bool,
    policy: HealthPolicy,
    now: DateTime<Utc>,
) -> HealthReport {
    // ---
    let threshold_secs = i64::try_from(policy.staleness_threshold.as_secs()).unwrap_or(i64::MAX);

    let mut per_location = BTreeMap::new();
    let mut stale_locations = Vec::new();

    for location in locations {
        let last = last_success.get(&location.name).copied();
        let age = last.map(|at| (now - at).num_seconds().max(0));

        if age.map_or(true, |secs| secs >= threshold_secs) {
            stale_locations.push(location.name.clone());
        }
        per_location.insert(
            location.name.clone(),
            LocationFreshness {
                last_success_at: last,
                freshness_seconds: age,
            },
        );
    }

    let status = if storage_degraded {
        HealthStatus::Degraded
    } else if !stale_locations.is_empty() {
        HealthStatus::Stale
    } else {
        HealthStatus::Ok
    };

    if !stale_locations.is_empty() {
        warn!("Stale data detected for {} locations", stale_locations.len());
    }

    HealthReport {
        status,
        fresh: status == HealthStatus::Ok,
        last_cycle_at,
        per_location,
        stale_locations,
        staleness_threshold_seconds: policy.staleness_threshold.as_secs(),
        checked_at: now,
    }
}
