//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in secrecy::SecretString so
//! credentials never reach the logs.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::scheduler::SchedulerConfig;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Maximum candidate rows inserted per pool and mode by one repopulation.
    pub cache_batch_size: i64,
    /// How long a reservation keeps its work item out of candidacy.
    pub reservation_ttl: Duration,
    /// Interval of the standing prune + repopulate pass over all pools.
    pub sweep_interval: Duration,
    pub db_max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            cache_batch_size: at_least_one("CACHE_BATCH_SIZE", parsed_var("CACHE_BATCH_SIZE", 100)?)?,
            reservation_ttl: Duration::from_secs(parsed_var("RESERVATION_TTL_SECS", 300)?),
            sweep_interval: Duration::from_secs(parsed_var("SWEEP_INTERVAL_SECS", 3600)?),
            db_max_connections: at_least_one("DB_MAX_CONNECTIONS", parsed_var("DB_MAX_CONNECTIONS", 10)?)?,
        })
    }

    /// Scheduler tuning derived from this configuration.
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            cache_batch_size: self.cache_batch_size,
            reservation_ttl: self.reservation_ttl,
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is not valid: {e}"))),
        Err(_) => Ok(default),
    }
}

fn at_least_one<T>(name: &str, value: T) -> Result<T>
where
    T: PartialOrd + From<u8> + std::fmt::Display,
{
    if value < T::from(1) {
        return Err(Error::Config(format!("{name}={value} must be at least 1")));
    }
    Ok(value)
}
