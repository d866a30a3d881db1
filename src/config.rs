//! Runtime configuration.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: `PostgreSQL` connection URL (required by the CLI)
//! - `DATABASE_MAX_CONNECTIONS`: pool size (default `10`)
//! - `REORDER_POSITION_INCREMENT`: spacing between keys (default `1000`)
//! - `REORDER_EXHAUSTION_EPSILON`: gap that raises the exhaustion signal (default `1e-6`)
//! - `REORDER_LOCK_TIMEOUT_MS`: row lock wait bound in milliseconds (default `5000`)
//! - `LOG_FORMAT`: `text` (default) | `json`
//!
//! # Example
//!
//! ```ignore
//! let config = ReorderConfig::builder()
//!     .database_url("postgres://localhost/board")
//!     .lock_timeout(Duration::from_millis(500))
//!     .build()?;
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{DEFAULT_EXHAUSTION_EPSILON, DEFAULT_INCREMENT, PositionAllocator};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

// =============================================================================
// Configuration Types
// =============================================================================

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "text" | "pretty" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigurationError::InvalidLogFormat(value.to_string())),
        }
    }
}

/// Settings for the reorder subsystem and its storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ReorderConfig {
    /// `PostgreSQL` connection URL.
    pub database_url: Option<String>,
    /// Maximum pool connections.
    pub max_connections: u32,
    /// Spacing between consecutive keys.
    pub position_increment: f64,
    /// Gap below which the exhaustion signal is raised.
    pub exhaustion_epsilon: f64,
    /// Row lock wait bound in milliseconds.
    pub lock_timeout_ms: u64,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            position_increment: DEFAULT_INCREMENT,
            exhaustion_epsilon: DEFAULT_EXHAUSTION_EPSILON,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            log_format: LogFormat::default(),
        }
    }
}

impl ReorderConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ReorderConfigBuilder {
        ReorderConfigBuilder::default()
    }

    /// Creates a configuration from process environment variables.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if a variable is present but malformed,
    /// or the resulting values fail [`ReorderConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a configuration from an arbitrary key lookup.
    ///
    /// Empty or whitespace-only values are treated as absent.
    ///
    /// # Errors
    ///
    /// See [`ReorderConfig::from_env`].
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            database_url: read("DATABASE_URL"),
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", read, defaults.max_connections)?,
            position_increment: parse_or(
                "REORDER_POSITION_INCREMENT",
                read,
                defaults.position_increment,
            )?,
            exhaustion_epsilon: parse_or(
                "REORDER_EXHAUSTION_EPSILON",
                read,
                defaults.exhaustion_epsilon,
            )?,
            lock_timeout_ms: parse_or("REORDER_LOCK_TIMEOUT_MS", read, defaults.lock_timeout_ms)?,
            log_format: read("LOG_FORMAT")
                .map(|value| value.parse::<LogFormat>())
                .transpose()?
                .unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidValue` for a non-positive increment,
    /// a negative or non-finite epsilon, a zero lock timeout or an empty pool.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.position_increment.is_finite() && self.position_increment > 0.0) {
            return Err(invalid(
                "REORDER_POSITION_INCREMENT",
                self.position_increment,
                "must be a positive finite number",
            ));
        }
        if !(self.exhaustion_epsilon.is_finite() && self.exhaustion_epsilon >= 0.0) {
            return Err(invalid(
                "REORDER_EXHAUSTION_EPSILON",
                self.exhaustion_epsilon,
                "must be a non-negative finite number",
            ));
        }
        if self.exhaustion_epsilon >= self.position_increment {
            return Err(invalid(
                "REORDER_EXHAUSTION_EPSILON",
                self.exhaustion_epsilon,
                "must be smaller than the position increment",
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(invalid(
                "REORDER_LOCK_TIMEOUT_MS",
                self.lock_timeout_ms,
                "must be greater than zero",
            ));
        }
        if self.max_connections == 0 {
            return Err(invalid(
                "DATABASE_MAX_CONNECTIONS",
                self.max_connections,
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Allocator configured with this spacing and threshold.
    #[must_use]
    pub const fn allocator(&self) -> PositionAllocator {
        PositionAllocator::new(self.position_increment, self.exhaustion_epsilon)
    }

    /// Row lock wait bound.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_or<T: FromStr>(
    key: &'static str,
    read: impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigurationError> {
    read(key).map_or(Ok(default), |value| {
        value
            .parse()
            .map_err(|_| ConfigurationError::InvalidValue {
                key,
                value: value.clone(),
                reason: "could not be parsed".to_string(),
            })
    })
}

fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Builder for `ReorderConfig`.
#[derive(Debug, Clone, Default)]
pub struct ReorderConfigBuilder {
    config: ReorderConfig,
}

impl ReorderConfigBuilder {
    /// Sets the `PostgreSQL` database URL.
    #[must_use]
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub const fn max_connections(mut self, max_connections: u32) -> Self {
        self.config.max_connections = max_connections;
        self
    }

    /// Sets the key spacing.
    #[must_use]
    pub const fn position_increment(mut self, increment: f64) -> Self {
        self.config.position_increment = increment;
        self
    }

    /// Sets the exhaustion threshold.
    #[must_use]
    pub const fn exhaustion_epsilon(mut self, epsilon: f64) -> Self {
        self.config.exhaustion_epsilon = epsilon;
        self
    }

    /// Sets the lock wait bound. Sub-millisecond parts are truncated.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the log format.
    #[must_use]
    pub const fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the configuration is invalid.
    pub fn build(self) -> Result<ReorderConfig, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while loading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A variable holds an unusable value.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Invalid log format value.
    #[error("Invalid log format: '{0}'. Expected 'text' or 'json'")]
    InvalidLogFormat(String),
}

// =============================================================================
// Tests
// =============================================================================
