//! Runtime configuration from environment variables

use crate::aggregate::AggregateField;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Memory,
    Sqlite,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Memory => "memory",
            BackendType::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the window runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Window store / registry backend
    pub backend: BackendType,

    /// Path to SQLite database file (sqlite backend only)
    pub db_path: String,

    /// Which reading fields feed the aggregate
    pub field: AggregateField,

    /// Deadline budget for the store calls of one ingestion
    pub store_timeout_ms: u64,

    /// Number of ordered ingestion workers
    pub ingest_workers: usize,

    /// Channel buffer size for incoming readings
    pub channel_buffer: usize,

    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub retry_max_attempts: u32,
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `WINDOW_BACKEND` (default: memory) - `memory` or `sqlite`
    /// - `WINDOW_DB_PATH` (default: data/devicewindow.db)
    /// - `DEVICE_FIELD` (default: device)
    /// - `AGGREGATE_FIELD` (default: tmp)
    /// - `SUM_FIELD` (default: tmpsum)
    /// - `STORE_TIMEOUT_MS` (default: 5000)
    /// - `INGEST_WORKERS` (default: 4)
    /// - `CHANNEL_BUFFER` (default: 1000)
    /// - `RETRY_INITIAL_MS` (default: 100)
    /// - `RETRY_MAX_MS` (default: 2000)
    /// - `RETRY_MAX_ATTEMPTS` (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_str = lookup("WINDOW_BACKEND").unwrap_or_else(|| "memory".to_string());
        let backend = match backend_str.to_lowercase().as_str() {
            "memory" => BackendType::Memory,
            "sqlite" => BackendType::Sqlite,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "WINDOW_BACKEND must be memory or sqlite, got '{}'",
                    other
                )))
            }
        };

        let db_path =
            lookup("WINDOW_DB_PATH").unwrap_or_else(|| "data/devicewindow.db".to_string());

        let field = AggregateField::new(
            non_empty(&lookup, "DEVICE_FIELD", "device")?,
            non_empty(&lookup, "AGGREGATE_FIELD", "tmp")?,
            non_empty(&lookup, "SUM_FIELD", "tmpsum")?,
        );

        let store_timeout_ms = parsed(&lookup, "STORE_TIMEOUT_MS", 5_000);

        let ingest_workers = parsed(&lookup, "INGEST_WORKERS", 4usize);
        if ingest_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "INGEST_WORKERS must be at least 1".to_string(),
            ));
        }

        let channel_buffer = parsed(&lookup, "CHANNEL_BUFFER", 1_000usize);
        if channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "CHANNEL_BUFFER must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            backend,
            db_path,
            field,
            store_timeout_ms,
            ingest_workers,
            channel_buffer,
            retry_initial_ms: parsed(&lookup, "RETRY_INITIAL_MS", 100),
            retry_max_ms: parsed(&lookup, "RETRY_MAX_MS", 2_000),
            retry_max_attempts: parsed(&lookup, "RETRY_MAX_ATTEMPTS", 3),
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Invalid {} '{}', defaulting to {}", key, raw, default);
            default
        }),
        None => default,
    }
}

fn non_empty<F>(lookup: &F, key: &str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if value.trim().is_empty() => {
            Err(ConfigError::InvalidValue(format!("{} cannot be empty", key)))
        }
        Some(value) => Ok(value.trim().to_string()),
        None => Ok(default.to_string()),
    }
}
