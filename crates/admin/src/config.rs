//! Back-office configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ADMIN_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `STOCK_MAX_RETRIES` - Attempts per product ledger transaction before giving up (default: 8)
//! - `SWEEP_INTERVAL_SECS` - Seconds between worker sweeps (default: 3600)
//! - `SWEEP_DISPOSE_EXPIRED` - Dispose lots as soon as they expire (default: false)
//! - `PAYMENT_TIMEOUT_MINUTES` - Minutes before an unpaid bank transfer is cancelled (default: 30)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Sentry error sample rate (default: 1.0)
//! - `LOG_FORMAT` - `json` for structured logs, anything else for text

use core::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

const DEFAULT_MAX_RETRIES: u32 = 8;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_PAYMENT_TIMEOUT_MINUTES: i64 = 30;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Back-office configuration.
///
/// `SecretString` redacts itself in `Debug` output, so the derive is safe.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// Stock transaction settings
    pub stock: StockConfig,
    /// Background sweep settings
    pub sweep: SweepConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Emit JSON logs instead of text
    pub json_logs: bool,
}

/// Optimistic-concurrency settings for product ledger writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockConfig {
    /// Attempts per transaction (a version conflict triggers a reload and retry).
    pub max_retries: u32,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Scheduled sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Time between worker runs.
    pub interval: Duration,
    /// Dispose lots in the same run that expires them.
    pub dispose_expired: bool,
    /// Age after which an unpaid bank transfer is cancelled.
    pub payment_timeout: chrono::Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            dispose_expired: false,
            payment_timeout: chrono::Duration::minutes(DEFAULT_PAYMENT_TIMEOUT_MINUTES),
        }
    }
}

impl AdminConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the database URL is missing or a numeric or
    /// boolean setting does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("ADMIN_DATABASE_URL")?;
        let stock = StockConfig::from_env()?;
        let sweep = SweepConfig::from_env()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let json_logs = get_optional_env("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

        Ok(Self {
            database_url,
            stock,
            sweep,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            json_logs,
        })
    }
}

impl StockConfig {
    /// Load from `STOCK_MAX_RETRIES`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` for a non-numeric or zero value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_retries = parse_env_or("STOCK_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        if max_retries == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "STOCK_MAX_RETRIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(Self { max_retries })
    }
}

impl SweepConfig {
    /// Load from the `SWEEP_*` and `PAYMENT_TIMEOUT_MINUTES` variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` for values that do not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let interval_secs = parse_env_or("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        let dispose_expired = parse_env_or("SWEEP_DISPOSE_EXPIRED", false)?;
        let timeout_minutes =
            parse_env_or("PAYMENT_TIMEOUT_MINUTES", DEFAULT_PAYMENT_TIMEOUT_MINUTES)?;
        Ok(Self {
            interval: Duration::from_secs(interval_secs.max(1)),
            dispose_expired,
            payment_timeout: chrono::Duration::minutes(timeout_minutes.max(0)),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse an optional environment variable, falling back to `default`.
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| parse_setting(key, &raw))
}

/// Parse a raw setting value, naming the variable on failure.
fn parse_setting<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}
