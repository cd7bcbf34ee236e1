//! Logging configuration and setup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Errors raised while installing the global subscriber.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Unknown log format: {0}")]
    UnknownFormat(String),

    #[error("Unknown log level: {0}")]
    UnknownLevel(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// Logging configuration.
///
/// `level` is kept as a string so the struct round-trips through the JSON
/// engine config; it is parsed when the subscriber is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Include source file location.
    pub include_location: bool,
    /// Custom filter string (e.g., "shellcache_sw=debug,reqwest=warn").
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_location: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Create a debug configuration.
    pub fn debug() -> Self {
        Self {
            level: "debug".to_string(),
            include_location: true,
            ..Default::default()
        }
    }

    /// Create a production configuration.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Set a custom filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Parsed log level.
    pub fn level(&self) -> Result<Level, LoggingError> {
        Level::from_str(&self.level).map_err(|_| LoggingError::UnknownLevel(self.level.clone()))
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let level = self.level()?;
        match self.filter {
            Some(ref custom) => EnvFilter::try_new(custom).map_err(|e| LoggingError::InvalidFilter {
                filter: custom.clone(),
                message: e.to_string(),
            }),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.to_string()))),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails instead of panicking when a subscriber is already installed, so
/// test harnesses can call it repeatedly.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = config.env_filter()?;

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                tfmt::layer()
                    .with_target(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(tfmt::layer().compact().with_target(true))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tfmt::layer().json())
            .try_init(),
    };

    result.map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))
}
