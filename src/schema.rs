//! Database schema management for `weatherflow`.
//!
//! Ensures the observation log and its indexes exist before any cycle runs or
//! any request is served. Applied once on startup from `AppContext::init`.

use sqlx::SqlitePool;

use crate::error::StorageError;

// ---

/// Create the database schema (idempotent).
///
/// Creates the append-only `observations` table plus the two indexes the
/// read paths depend on. Safe to call on every startup; no-op if objects
/// already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    // ---
    let mut tx = pool.begin().await?;

    // Timestamps are UTC epoch milliseconds so range scans compare integers.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observations (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            location              TEXT    NOT NULL,
            observed_at           INTEGER NOT NULL,
            fetched_at            INTEGER NOT NULL,
            temperature_c         REAL    NOT NULL,
            feels_like_c          REAL    NOT NULL,
            humidity_pct          INTEGER NOT NULL CHECK (humidity_pct BETWEEN 0 AND 100),
            pressure_hpa          INTEGER NOT NULL CHECK (pressure_hpa > 0),
            wind_speed_ms         REAL    NOT NULL CHECK (wind_speed_ms >= 0),
            wind_deg              INTEGER NOT NULL CHECK (wind_deg BETWEEN 0 AND 360),
            condition_main        TEXT    NOT NULL,
            condition_description TEXT    NOT NULL,
            latitude              REAL,
            longitude             REAL,
            visibility_m          INTEGER,
            clouds_pct            INTEGER,
            rain_1h_mm            REAL,
            snow_1h_mm            REAL,
            raw_payload           TEXT    NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Latest-per-location and history lookups
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_observations_location_observed
            ON observations (location, observed_at, fetched_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Freshness queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_observations_fetched_at
            ON observations (fetched_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Last success per location
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_observations_location_fetched
            ON observations (location, fetched_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
