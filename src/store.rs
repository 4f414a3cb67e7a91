//! Observation store: append-only log of observations in SQLite.
//!
//! The scheduler is the only writer; the serving API reads concurrently.
//! File databases run in WAL mode so readers never wait on the writer for
//! longer than one single-row transaction.

use std::{collections::HashMap, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::models::{Observation, ObservationRow};
use crate::schema;

// ---

const COLUMNS: &str = "id, location, observed_at, fetched_at, temperature_c, feels_like_c, \
     humidity_pct, pressure_hpa, wind_speed_ms, wind_deg, condition_main, \
     condition_description, latitude, longitude, visibility_m, clouds_pct, \
     rain_1h_mm, snow_1h_mm, raw_payload";

/// Distinct locations, one index seek per location instead of a full scan.
/// The final row of `locs` is NULL and must be filtered by the caller.
const DISTINCT_LOCATIONS: &str = r#"
    WITH RECURSIVE locs(location) AS (
        SELECT MIN(location) FROM observations
        UNION ALL
        SELECT (
            SELECT n.location FROM observations n
            WHERE n.location > locs.location
            ORDER BY n.location
            LIMIT 1
        )
        FROM locs
        WHERE locs.location IS NOT NULL
    )
"#;

fn latest_sql() -> String {
    format!(
        r#"
        {DISTINCT_LOCATIONS}
        SELECT {COLUMNS} FROM observations
        WHERE id IN (
            SELECT (
                SELECT i.id FROM observations i
                WHERE i.location = locs.location
                ORDER BY i.observed_at DESC, i.fetched_at DESC, i.id DESC
                LIMIT 1
            )
            FROM locs
            WHERE locs.location IS NOT NULL
        )
        ORDER BY location ASC
        "#
    )
}

fn last_success_sql() -> String {
    format!(
        r#"
        {DISTINCT_LOCATIONS}
        SELECT locs.location, (
            SELECT MAX(f.fetched_at) FROM observations f
            WHERE f.location = locs.location
        )
        FROM locs
        WHERE locs.location IS NOT NULL
        "#
    )
}

/// Inclusive bounds on `observed_at`; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Parse `START,END` (RFC 3339 each, either may be empty).
    pub fn parse(text: &str) -> Result<Self, String> {
        // ---
        let (start, end) = text
            .split_once(',')
            .ok_or_else(|| format!("expected 'START,END', got '{text}'"))?;

        let parse_side = |side: &str| -> Result<Option<DateTime<Utc>>, String> {
            let side = side.trim();
            if side.is_empty() {
                return Ok(None);
            }
            DateTime::parse_from_rfc3339(side)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| format!("'{side}' is not an RFC 3339 timestamp: {e}"))
        };

        let range = Self::new(parse_side(start)?, parse_side(end)?);
        if let (Some(s), Some(e)) = (range.start, range.end) {
            if s > e {
                return Err(format!("range start {s} is after end {e}"));
            }
        }
        Ok(range)
    }

    fn bounds_millis(&self) -> (Option<i64>, Option<i64>) {
        (
            self.start.map(|t| t.timestamp_millis()),
            self.end.map(|t| t.timestamp_millis()),
        )
    }
}

/// Handle to the observation log. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ObservationStore {
    pool: SqlitePool,
}

impl ObservationStore {
    /// Open (creating if needed) the database at `db_url` and apply the schema.
    pub async fn open(db_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        // ---
        let in_memory = db_url.contains(":memory:") || db_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);

        if in_memory {
            // The database lives only as long as one connection holds it open.
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = pool_options.connect_with(options).await?;
        schema::create_schema(&pool).await?;

        info!(in_memory, "Observation store ready");
        Ok(Self { pool })
    }

    /// A private in-memory store, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::open("sqlite::memory:", 1).await
    }

    /// Append one observation. The single-row insert is atomic: either the
    /// whole record becomes visible or nothing does.
    pub async fn append(&self, obs: &Observation) -> Result<(), StorageError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO observations (
                location, observed_at, fetched_at,
                temperature_c, feels_like_c, humidity_pct, pressure_hpa,
                wind_speed_ms, wind_deg, condition_main, condition_description,
                latitude, longitude, visibility_m, clouds_pct,
                rain_1h_mm, snow_1h_mm, raw_payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
        )
        .bind(&obs.location)
        .bind(obs.observed_at.timestamp_millis())
        .bind(obs.fetched_at.timestamp_millis())
        .bind(obs.temperature_c)
        .bind(obs.feels_like_c)
        .bind(obs.humidity_pct)
        .bind(obs.pressure_hpa)
        .bind(obs.wind_speed_ms)
        .bind(obs.wind_deg)
        .bind(&obs.condition_main)
        .bind(&obs.condition_description)
        .bind(obs.latitude)
        .bind(obs.longitude)
        .bind(obs.visibility_m)
        .bind(obs.clouds_pct)
        .bind(obs.rain_1h_mm)
        .bind(obs.snow_1h_mm)
        .bind(&obs.raw_payload)
        .execute(&self.pool)
        .await?;

        debug!(location = %obs.location, observed_at = %obs.observed_at, "Observation appended");
        Ok(())
    }

    /// Exactly one record per distinct location: the one with the greatest
    /// `observed_at`, ties broken by the greatest `fetched_at`.
    pub async fn latest_per_location(&self) -> Result<Vec<Observation>, StorageError> {
        // ---
        let sql = latest_sql();

        let rows = sqlx::query_as::<_, ObservationRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Observation::try_from).collect()
    }

    /// Observations for one location, ascending by `observed_at`.
    ///
    /// With a `limit`, the most recent `limit` records are returned (still in
    /// ascending order). Unknown locations yield an empty vector.
    pub async fn history(
        &self,
        location: &str,
        range: TimeRange,
        limit: Option<u32>,
    ) -> Result<Vec<Observation>, StorageError> {
        // ---
        let (start, end) = range.bounds_millis();
        let sql = format!(
            r#"
            SELECT * FROM (
                SELECT {COLUMNS} FROM observations
                WHERE location = ?1
                  AND (?2 IS NULL OR observed_at >= ?2)
                  AND (?3 IS NULL OR observed_at <= ?3)
                ORDER BY observed_at DESC, fetched_at DESC, id DESC
                LIMIT ?4
            )
            ORDER BY observed_at ASC, fetched_at ASC, id ASC
            "#
        );

        let rows = sqlx::query_as::<_, ObservationRow>(&sql)
            .bind(location)
            .bind(start)
            .bind(end)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Observation::try_from).collect()
    }

    /// Observations for every location, ascending by `observed_at` then
    /// location. `limit` behaves as in [`ObservationStore::history`].
    pub async fn all(
        &self,
        range: TimeRange,
        limit: Option<u32>,
    ) -> Result<Vec<Observation>, StorageError> {
        // ---
        let (start, end) = range.bounds_millis();
        let sql = format!(
            r#"
            SELECT * FROM (
                SELECT {COLUMNS} FROM observations
                WHERE (?1 IS NULL OR observed_at >= ?1)
                  AND (?2 IS NULL OR observed_at <= ?2)
                ORDER BY observed_at DESC, location DESC, fetched_at DESC, id DESC
                LIMIT ?3
            )
            ORDER BY observed_at ASC, location ASC, fetched_at ASC, id ASC
            "#
        );

        let rows = sqlx::query_as::<_, ObservationRow>(&sql)
            .bind(start)
            .bind(end)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Observation::try_from).collect()
    }

    /// Most recent `fetched_at` per location, i.e. its last successful store.
    pub async fn last_success_per_location(
        &self,
    ) -> Result<HashMap<String, DateTime<Utc>>, StorageError> {
        // ---
        let rows: Vec<(String, i64)> = sqlx::query_as(&last_success_sql())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(location, ms)| {
                DateTime::from_timestamp_millis(ms)
                    .map(|ts| (location, ts))
                    .ok_or_else(|| StorageError::Corrupt(format!("fetched_at={ms}")))
            })
            .collect()
    }

    /// Most recent `fetched_at` across all locations.
    pub async fn last_fetched_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        // ---
        let (ms,): (Option<i64>,) = sqlx::query_as("SELECT MAX(fetched_at) FROM observations")
            .fetch_one(&self.pool)
            .await?;
        Ok(ms.and_then(DateTime::from_timestamp_millis))
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM observations")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Close every pooled connection; pending writes finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<u32>) -> i64 {
    limit.map_or(-1, i64::from)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, h, m, 0).unwrap()
    }

    fn create_test_observation(
        location: &str,
        observed_at: DateTime<Utc>,
        fetched_at: DateTime<Utc>,
    ) -> Observation {
        // ---
        Observation {
            location: location.to_string(),
            observed_at,
            fetched_at,
            temperature_c: 28.4,
            feels_like_c: 31.0,
            humidity_pct: 80,
            pressure_hpa: 1008,
            wind_speed_ms: 3.2,
            wind_deg: 200,
            condition_main: "Rain".to_string(),
            condition_description: "light rain".to_string(),
            latitude: None,
            longitude: None,
            visibility_m: None,
            clouds_pct: None,
            rain_1h_mm: Some(0.3),
            snow_1h_mm: None,
            raw_payload: format!(r#"{{"location":"{location}"}}"#),
        }
    }

    #[tokio::test]
    async fn test_latest_picks_max_observed_at() {
        // ---
        let store = ObservationStore::in_memory().await.unwrap();
        let first = create_test_observation("Colombo", at(10, 0), at(10, 1));
        let second = create_test_observation("Colombo", at(10, 5), at(10, 6));

        // Appended out of order: latest is decided by observed_at, not insertion.
        store.append(&second).await.unwrap();
        store.append(&first).await.unwrap();

        let latest = store.latest_per_location().await.unwrap();
        assert_eq!(latest, vec![second]);
    }

    #[tokio::test]
    async fn test_latest_breaks_ties_by_fetched_at() {
        // ---
        let store = ObservationStore::in_memory().await.unwrap();
        let early = create_test_observation("Kandy", at(9, 0), at(9, 10));
        let late = create_test_observation("Kandy", at(9, 0), at(10, 10));

        store.append(&late).await.unwrap();
        store.append(&early).await.unwrap();

        let latest = store.latest_per_location().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].fetched_at, at(10, 10));
    }

    #[tokio::test]
    async fn test_latest_has_one_entry_per_location() {
        // ---
        let store = ObservationStore::in_memory().await.unwrap();
        for (loc, m) in [("Kandy", 0), ("Colombo", 0), ("Kandy", 30), ("Colombo", 15)] {
            store
                .append(&create_test_observation(loc, at(8, m), at(8, m + 1)))
                .await
                .unwrap();
        }

        let latest = store.latest_per_location().await.unwrap();
        let summary: Vec<_> = latest
            .iter()
            .map(|o| (o.location.as_str(), o.observed_at))
            .collect();
        assert_eq!(summary, vec![("Colombo", at(8, 15)), ("Kandy", at(8, 30))]);
    }

    #[tokio::test]
    async fn test_history_is_ascending_and_filtered() {
        // ---
        let store = ObservationStore::in_memory().await.unwrap();
        for m in [30, 0, 45, 15] {
            store
                .append(&create_test_observation("Kandy", at(12, m), at(12, m)))
                .await
                .unwrap();
        }
        store
            .append(&create_test_observation("Colombo", at(12, 20), at(12, 20)))
            .await
            .unwrap();

        let all = store
            .history("Kandy", TimeRange::default(), None)
            .await
            .unwrap();
        let times: Vec<_> = all.iter().map(|o| o.observed_at).collect();
        assert_eq!(times, vec![at(12, 0), at(12, 15), at(12, 30), at(12, 45)]);

        let window = TimeRange::new(Some(at(12, 10)), Some(at(12, 30)));
        let ranged = store.history("Kandy", window, None).await.unwrap();
        let times: Vec<_> = ranged.iter().map(|o| o.observed_at).collect();
        assert_eq!(times, vec![at(12, 15), at(12, 30)]);

        let newest_two = store
            .history("Kandy", TimeRange::default(), Some(2))
            .await
            .unwrap();
        let times: Vec<_> = newest_two.iter().map(|o| o.observed_at).collect();
        assert_eq!(times, vec![at(12, 30), at(12, 45)]);
    }

    #[tokio::test]
    async fn test_unknown_location_history_is_empty() {
        // ---
        let store = ObservationStore::in_memory().await.unwrap();
        store
            .append(&create_test_observation("Kandy", at(7, 0), at(7, 0)))
            .await
            .unwrap();

        let history = store
            .history("Nonexistent", TimeRange::default(), None)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_all_orders_across_locations() {
        // ---
        let store = ObservationStore::in_memory().await.unwrap();
        store
            .append(&create_test_observation("Kandy", at(6, 0), at(6, 1)))
            .await
            .unwrap();
        store
            .append(&create_test_observation("Colombo", at(6, 0), at(6, 1)))
            .await
            .unwrap();
        store
            .append(&create_test_observation("Anuradhapura", at(5, 0), at(5, 1)))
            .await
            .unwrap();

        let all = store.all(TimeRange::default(), None).await.unwrap();
        let order: Vec<_> = all.iter().map(|o| o.location.as_str()).collect();
        assert_eq!(order, vec!["Anuradhapura", "Colombo", "Kandy"]);

        let since_six = store
            .all(TimeRange::new(Some(at(6, 0)), None), None)
            .await
            .unwrap();
        assert_eq!(since_six.len(), 2);
    }

    #[tokio::test]
    async fn test_freshness_queries() {
        // ---
        let store = ObservationStore::in_memory().await.unwrap();
        assert_eq!(store.last_fetched_at().await.unwrap(), None);
        assert!(store.last_success_per_location().await.unwrap().is_empty());

        store
            .append(&create_test_observation("Kandy", at(6, 0), at(6, 2)))
            .await
            .unwrap();
        store
            .append(&create_test_observation("Kandy", at(7, 0), at(7, 2)))
            .await
            .unwrap();
        store
            .append(&create_test_observation("Colombo", at(6, 30), at(6, 32)))
            .await
            .unwrap();

        let last = store.last_success_per_location().await.unwrap();
        assert_eq!(last.get("Kandy"), Some(&at(7, 2)));
        assert_eq!(last.get("Colombo"), Some(&at(6, 32)));
        assert_eq!(store.last_fetched_at().await.unwrap(), Some(at(7, 2)));
        assert_eq!(store.count().await.unwrap(), 3);
    }

    async fn plan_details(store: &ObservationStore, sql: &str) -> Vec<String> {
        // ---
        use sqlx::Row;
        sqlx::query(&format!("EXPLAIN QUERY PLAN {sql}"))
            .fetch_all(&store.pool)
            .await
            .unwrap()
            .iter()
            .map(|row| row.get::<String, _>("detail"))
            .collect()
    }

    #[tokio::test]
    async fn test_per_location_reads_seek_instead_of_scanning() {
        // ---
        let store = ObservationStore::in_memory().await.unwrap();
        for (loc, m) in [("Kandy", 0), ("Colombo", 5), ("Galle", 10)] {
            store
                .append(&create_test_observation(loc, at(8, m), at(8, m + 1)))
                .await
                .unwrap();
        }

        for sql in [latest_sql(), last_success_sql()] {
            let details = plan_details(&store, &sql).await;
            // Only the small CTE of distinct locations may be walked row by row.
            let scans: Vec<_> = details
                .iter()
                .filter(|d| d.starts_with("SCAN") && !d.contains("locs"))
                .collect();
            assert!(scans.is_empty(), "unexpected table scan in {details:?}");
            assert!(
                details.iter().any(|d| d.contains("INDEX idx_observations_location")),
                "no location index used in {details:?}"
            );
        }

        assert_eq!(store.latest_per_location().await.unwrap().len(), 3);
        assert_eq!(store.last_success_per_location().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_file_store_creates_missing_parent_dir() {
        // ---
        let root = std::env::temp_dir().join(format!("weatherflow-{}", uuid::Uuid::new_v4()));
        let db_path = root.join("nested").join("weather.db");
        let url = format!("sqlite://{}", db_path.display());

        let store = ObservationStore::open(&url, 2).await.unwrap();
        store
            .append(&create_test_observation("Kandy", at(9, 0), at(9, 1)))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        store.close().await;

        assert!(db_path.exists());
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_stored_record_round_trips_verbatim_payload() {
        // ---
        let store = ObservationStore::in_memory().await.unwrap();
        let obs = create_test_observation("Colombo", at(11, 0), at(11, 0));
        store.append(&obs).await.unwrap();

        let back = store
            .history("Colombo", TimeRange::default(), None)
            .await
            .unwrap();
        assert_eq!(back, vec![obs]);
    }

    #[test]
    fn test_time_range_parsing() {
        // ---
        let range = TimeRange::parse("2025-03-21T00:00:00Z,2025-03-22T00:00:00Z").unwrap();
        assert_eq!(
            range.start,
            Some(Utc.with_ymd_and_hms(2025, 3, 21, 0, 0, 0).unwrap())
        );
        assert_eq!(
            range.end,
            Some(Utc.with_ymd_and_hms(2025, 3, 22, 0, 0, 0).unwrap())
        );

        let open_end = TimeRange::parse("2025-03-21T05:30:00+05:30,").unwrap();
        assert_eq!(
            open_end.start,
            Some(Utc.with_ymd_and_hms(2025, 3, 21, 0, 0, 0).unwrap())
        );
        assert_eq!(open_end.end, None);

        assert!(TimeRange::parse("yesterday").is_err());
        assert!(TimeRange::parse("2025-03-22T00:00:00Z,2025-03-21T00:00:00Z").is_err());
        assert!(TimeRange::parse("not-a-date,").is_err());
    }
}
