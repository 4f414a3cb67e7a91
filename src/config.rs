//! Configuration loader for the `weatherflow` collection pipeline.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::{env, net::SocketAddr, time::Duration};

use crate::error::ConfigError;
use crate::location::{parse_registry, Location};

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| ConfigError::Invalid {
                var: $var_name,
                reason: e.to_string(),
            })?
            .unwrap_or($default)
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| $default.to_string())
    };
}

pub const DEFAULT_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_LOCATIONS: &str =
    "Colombo,Sri Lanka;Kandy,Sri Lanka;Anuradhapura,Sri Lanka;London,UK";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://db/weather.db";

/// Inclusive temperature bounds applied by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureBounds {
    pub min_c: f64,
    pub max_c: f64,
}

impl Default for TemperatureBounds {
    fn default() -> Self {
        Self {
            min_c: -100.0,
            max_c: 100.0,
        }
    }
}

impl TemperatureBounds {
    pub fn contains(&self, value_c: f64) -> bool {
        (self.min_c..=self.max_c).contains(&value_c)
    }
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Provider credential; only needed by commands that collect.
    pub api_key: Option<String>,

    /// Provider "current weather" endpoint.
    pub api_url: String,

    /// Per-request timeout for provider calls.
    pub api_timeout: Duration,

    /// Registered locations, in configuration order.
    pub locations: Vec<Location>,

    /// SQLite connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Time between the starts of two consecutive cycles.
    pub schedule_interval: Duration,

    /// Retries after the first provider attempt.
    pub max_retries: u32,

    /// Backoff seed; doubled on every retry.
    pub retry_delay: Duration,

    /// Backoff cap.
    pub retry_max_delay: Duration,

    pub temperature_bounds: TemperatureBounds,

    /// Age beyond which a location's data counts as stale.
    pub staleness_threshold: Duration,

    /// Upper bound on concurrent location tasks within one cycle.
    pub max_concurrent_fetches: usize,

    /// Consecutive cycles with storage failures before health reports degraded.
    pub storage_degraded_after: u32,

    /// Address the read API binds to.
    pub bind_addr: SocketAddr,
}

/// Load configuration from environment variables with defaults.
///
/// All variables are optional:
/// - `OWM_API_KEY` – provider credential, checked by [`Config::require_api_key`]
/// - `LOCATIONS` – `;`-separated registry entries
/// - `DATABASE_URL` – SQLite connection string (default: `sqlite://db/weather.db`)
/// - `SCHEDULE_INTERVAL_HOURS`, `MAX_RETRIES`, `RETRY_DELAY_SECONDS`,
///   `MIN_TEMP_C`, `MAX_TEMP_C`, `STALENESS_THRESHOLD_MINUTES`, ...
///
/// Returns an error if any variable is present but invalid, or if the
/// resulting configuration is inconsistent.
pub fn load_from_env() -> Result<Config, ConfigError> {
    // ---
    let api_key = env::var("OWM_API_KEY").ok().filter(|k| !k.trim().is_empty());
    let api_url = env_or!("OWM_API_BASE_URL", DEFAULT_API_URL);
    let api_timeout_secs = parse_env!("OWM_API_TIMEOUT", u64, 20);
    let locations = parse_registry(&env_or!("LOCATIONS", DEFAULT_LOCATIONS))?;
    let db_url = env_or!("DATABASE_URL", DEFAULT_DATABASE_URL);
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, 5);
    let interval_hours = parse_env!("SCHEDULE_INTERVAL_HOURS", f64, 1.0);
    let max_retries = parse_env!("MAX_RETRIES", u32, 3);
    let retry_delay_secs = parse_env!("RETRY_DELAY_SECONDS", u64, 5);
    let retry_max_delay_secs = parse_env!("RETRY_MAX_DELAY_SECONDS", u64, 300);
    let min_c = parse_env!("MIN_TEMP_C", f64, -100.0);
    let max_c = parse_env!("MAX_TEMP_C", f64, 100.0);
    let staleness_minutes = parse_env!("STALENESS_THRESHOLD_MINUTES", u64, 90);
    let max_concurrent_fetches = parse_env!("MAX_CONCURRENT_FETCHES", usize, 4);
    let storage_degraded_after = parse_env!("STORAGE_DEGRADED_AFTER_CYCLES", u32, 2);
    let bind_addr = parse_env!(
        "BIND_ADDR",
        SocketAddr,
        SocketAddr::from(([0, 0, 0, 0], 8080))
    );

    let cfg = Config {
        api_key,
        api_url,
        api_timeout: Duration::from_secs(api_timeout_secs),
        locations,
        db_url,
        db_pool_max,
        schedule_interval: interval_from_hours(interval_hours)?,
        max_retries,
        retry_delay: Duration::from_secs(retry_delay_secs),
        retry_max_delay: Duration::from_secs(retry_max_delay_secs),
        temperature_bounds: TemperatureBounds { min_c, max_c },
        staleness_threshold: threshold_from_minutes(staleness_minutes)?,
        max_concurrent_fetches,
        storage_degraded_after,
        bind_addr,
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Convert a (possibly fractional) hour count into a positive interval.
pub fn interval_from_hours(hours: f64) -> Result<Duration, ConfigError> {
    // ---
    if !hours.is_finite() || hours <= 0.0 {
        return Err(ConfigError::Invalid {
            var: "SCHEDULE_INTERVAL_HOURS",
            reason: format!("must be a positive number of hours, got {hours}"),
        });
    }
    Duration::try_from_secs_f64(hours * 3600.0).map_err(|e| ConfigError::Invalid {
        var: "SCHEDULE_INTERVAL_HOURS",
        reason: format!("{hours} hours is not a representable interval: {e}"),
    })
}

/// Convert a minute count into a threshold, rejecting values that overflow.
pub fn threshold_from_minutes(minutes: u64) -> Result<Duration, ConfigError> {
    // ---
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Invalid {
            var: "STALENESS_THRESHOLD_MINUTES",
            reason: format!("{minutes} minutes overflows the threshold"),
        })
}

impl Config {
    /// Cross-field checks that individual parsers cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // ---
        let bounds = self.temperature_bounds;
        if !bounds.min_c.is_finite() || !bounds.max_c.is_finite() || bounds.min_c > bounds.max_c
        {
            return Err(ConfigError::Invalid {
                var: "MIN_TEMP_C",
                reason: format!(
                    "temperature bounds [{}, {}] are not a valid range",
                    bounds.min_c, bounds.max_c
                ),
            });
        }
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_CONCURRENT_FETCHES",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.db_pool_max == 0 {
            return Err(ConfigError::Invalid {
                var: "DB_POOL_MAX",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.locations.is_empty() {
            return Err(ConfigError::NoLocations);
        }
        Ok(())
    }

    /// The provider credential, required by the collecting commands.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential)
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the provider credential while showing all other values.
    pub fn log_config(&self) {
        // ---
        let masked_key = match &self.api_key {
            Some(key) if key.chars().count() > 4 => {
                let tail: String = key.chars().skip(key.chars().count() - 4).collect();
                format!("****{tail}")
            }
            Some(_) => "****".to_string(),
            None => "<unset>".to_string(),
        };
        let names: Vec<&str> = self.locations.iter().map(|l| l.name.as_str()).collect();

        tracing::info!("Configuration loaded:");
        tracing::info!("  OWM_API_KEY          : {}", masked_key);
        tracing::info!("  OWM_API_BASE_URL     : {}", self.api_url);
        tracing::info!("  OWM_API_TIMEOUT      : {:?}", self.api_timeout);
        tracing::info!("  LOCATIONS            : {}", names.join("; "));
        tracing::info!("  DATABASE_URL         : {}", self.db_url);
        tracing::info!("  DB_POOL_MAX          : {}", self.db_pool_max);
        tracing::info!("  SCHEDULE_INTERVAL    : {:?}", self.schedule_interval);
        tracing::info!("  MAX_RETRIES          : {}", self.max_retries);
        tracing::info!("  RETRY_DELAY          : {:?}", self.retry_delay);
        tracing::info!(
            "  TEMP BOUNDS (C)      : [{}, {}]",
            self.temperature_bounds.min_c,
            self.temperature_bounds.max_c
        );
        tracing::info!("  STALENESS_THRESHOLD  : {:?}", self.staleness_threshold);
        tracing::info!("  MAX_CONCURRENT       : {}", self.max_concurrent_fetches);
        tracing::info!("  BIND_ADDR            : {}", self.bind_addr);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::location::Location;

    fn sample_config() -> Config {
        // ---
        Config {
            api_key: Some("abcdef123456".to_string()),
            api_url: DEFAULT_API_URL.to_string(),
            api_timeout: Duration::from_secs(20),
            locations: vec![Location::parse("Kandy").unwrap()],
            db_url: "sqlite::memory:".to_string(),
            db_pool_max: 1,
            schedule_interval: Duration::from_secs(3600),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(300),
            temperature_bounds: TemperatureBounds::default(),
            staleness_threshold: Duration::from_secs(90 * 60),
            max_concurrent_fetches: 4,
            storage_degraded_after: 2,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }

    #[test]
    fn fractional_interval_hours() {
        // ---
        assert_eq!(
            interval_from_hours(0.25).unwrap(),
            Duration::from_secs(15 * 60)
        );
        assert!(interval_from_hours(0.0).is_err());
        assert!(interval_from_hours(-1.0).is_err());
        assert!(interval_from_hours(f64::NAN).is_err());
    }

    #[test]
    fn oversized_interval_hours_are_rejected() {
        // ---
        let err = interval_from_hours(1e16).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "SCHEDULE_INTERVAL_HOURS",
                ..
            }
        ));
        assert!(interval_from_hours(f64::MAX).is_err());
    }

    #[test]
    fn staleness_minutes_overflow_is_rejected() {
        // ---
        assert_eq!(
            threshold_from_minutes(90).unwrap(),
            Duration::from_secs(90 * 60)
        );
        assert!(matches!(
            threshold_from_minutes(u64::MAX),
            Err(ConfigError::Invalid {
                var: "STALENESS_THRESHOLD_MINUTES",
                ..
            })
        ));
    }

    #[test]
    fn inverted_temperature_bounds_are_rejected() {
        // ---
        let mut cfg = sample_config();
        cfg.temperature_bounds = TemperatureBounds {
            min_c: 50.0,
            max_c: -50.0,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        // ---
        let mut cfg = sample_config();
        cfg.max_concurrent_fetches = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_credential_only_fails_when_required() {
        // ---
        let mut cfg = sample_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.require_api_key().unwrap(), "abcdef123456");

        cfg.api_key = None;
        assert!(cfg.validate().is_ok());
        assert!(matches!(
            cfg.require_api_key(),
            Err(ConfigError::MissingCredential)
        ));
    }

    #[test]
    fn bounds_are_inclusive() {
        // ---
        let bounds = TemperatureBounds::default();
        assert!(bounds.contains(-100.0));
        assert!(bounds.contains(100.0));
        assert!(!bounds.contains(100.01));
    }
}
