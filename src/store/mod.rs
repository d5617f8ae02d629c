//! Window store and device registry interfaces
//!
//! The processor only talks to these traits. Concrete backends:
//! - `memory` - process-local maps (tests, single-node runtime)
//! - `sqlite` - durable rusqlite tables

use async_trait::async_trait;
use std::future::Future;
use tokio::time::{timeout_at, Instant};

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryDeviceRegistry, MemoryWindowStore};
pub use sqlite::{SqliteDeviceRegistry, SqliteWindowStore};

#[derive(Debug)]
pub enum StoreError {
    /// No state stored for the key
    NotFound,
    /// Create call hit an existing entry
    AlreadyExists,
    /// Backend unreachable or refusing requests
    Unavailable(String),
    /// Call gave up at its deadline without writing anything
    Timeout,
    Database(String),
    Serialization(serde_json::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        // busy_timeout expired while another connection held the lock
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                StoreError::Timeout
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "Not found"),
            StoreError::AlreadyExists => write!(f, "Already exists"),
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {}", e),
            StoreError::Timeout => write!(f, "Deadline exceeded"),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Failures worth retrying at the transport layer
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Timeout | StoreError::Database(_)
        )
    }
}

/// Run `fut` unless `deadline` already passed, and give up on it at `deadline`
///
/// Only effective for futures that actually suspend. Backends doing blocking
/// work must enforce the deadline inside the call instead.
pub async fn bounded<T, F>(deadline: Instant, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    if Instant::now() >= deadline {
        return Err(StoreError::Timeout);
    }
    timeout_at(deadline, fut)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

/// Per-device window persistence
///
/// `get` and `put` must each be atomic for a given key.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Read the stored window, oldest value first
    ///
    /// Returns `Err(StoreError::NotFound)` when the device has no window yet.
    async fn get(&self, device_id: &str) -> Result<Vec<f64>, StoreError>;

    /// Replace the entire stored window for the device
    async fn put(&self, device_id: &str, values: &[f64]) -> Result<(), StoreError>;

    /// `get` that fails with `StoreError::Timeout` once `deadline` passes
    async fn get_before(
        &self,
        device_id: &str,
        deadline: Instant,
    ) -> Result<Vec<f64>, StoreError> {
        bounded(deadline, self.get(device_id)).await
    }

    /// `put` that fails with `StoreError::Timeout` once `deadline` passes
    ///
    /// A timed out put must leave the stored window untouched.
    async fn put_before(
        &self,
        device_id: &str,
        values: &[f64],
        deadline: Instant,
    ) -> Result<(), StoreError> {
        bounded(deadline, self.put(device_id, values)).await
    }

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Device identity registry, separate from window storage
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Register the device
    ///
    /// Implementations may report `StoreError::AlreadyExists`; callers treat
    /// it as success.
    async fn create_if_absent(&self, device_id: &str) -> Result<(), StoreError>;

    async fn create_if_absent_before(
        &self,
        device_id: &str,
        deadline: Instant,
    ) -> Result<(), StoreError> {
        bounded(deadline, self.create_if_absent(device_id)).await
    }

    fn backend_type(&self) -> &'static str;
}
