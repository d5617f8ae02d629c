//! Sliding-window aggregation over a pluggable window store
//!
//! One `ingest` call is a read-modify-write cycle:
//!
//! ```text
//! WindowStore::get   (NotFound → empty window)
//!     ↓
//! DeviceRegistry::create_if_absent   (AlreadyExists → ok)
//!     ↓
//! push value, evict oldest past WINDOW_CAPACITY, sum
//!     ↓
//! WindowStore::put   (whole window)
//! ```
//!
//! Calls for the same device are serialized through `DeviceLocks`, so two
//! concurrent readings can never both start from the same prior window.
//! Different devices run in parallel.

use super::field::AggregateField;
use super::locks::DeviceLocks;
use super::types::{AggregateResult, DeviceWindow, IngestOutcome};
use crate::store::{DeviceRegistry, StoreError, WindowStore};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default budget for the store calls of a single ingestion
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Get,
    CreateDevice,
    Put,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::Get => "get",
            StoreOperation::CreateDevice => "create_device",
            StoreOperation::Put => "put",
        }
    }
}

#[derive(Debug)]
pub enum IngestError {
    /// Device id was empty
    InvalidDeviceId,
    /// Window store failure other than NotFound, passed through unchanged
    Store(StoreError),
    /// A store or registry call missed the deadline
    Timeout { operation: StoreOperation },
    /// Registry refused to create the device for a reason other than AlreadyExists
    ProvisioningFailed(StoreError),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::InvalidDeviceId => write!(f, "Device id must not be empty"),
            IngestError::Store(e) => write!(f, "Window store error: {}", e),
            IngestError::Timeout { operation } => {
                write!(f, "Store timeout during {}", operation.as_str())
            }
            IngestError::ProvisioningFailed(e) => write!(f, "Provisioning failed: {}", e),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Store(e) | IngestError::ProvisioningFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        IngestError::Store(err)
    }
}

impl IngestError {
    /// Whether re-running the whole ingestion may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::InvalidDeviceId => false,
            IngestError::Store(e) | IngestError::ProvisioningFailed(e) => e.is_transient(),
            IngestError::Timeout { .. } => true,
        }
    }
}

pub struct AggregateWindowProcessor {
    store: Arc<dyn WindowStore>,
    registry: Option<Arc<dyn DeviceRegistry>>,
    locks: DeviceLocks,
    store_timeout: Duration,
}

impl AggregateWindowProcessor {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self {
            store,
            registry: None,
            locks: DeviceLocks::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Provision devices through `registry` before their window is written
    pub fn with_registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Ingest with the configured timeout as deadline
    pub async fn ingest(
        &self,
        device_id: &str,
        value: Option<f64>,
    ) -> Result<IngestOutcome, IngestError> {
        self.ingest_before(device_id, value, Instant::now() + self.store_timeout)
            .await
    }

    /// Ingest one value; every store and registry call must finish by `deadline`
    ///
    /// A missing or non-finite value is a no-op and returns
    /// `IngestOutcome::NothingToAggregate` without touching any collaborator.
    pub async fn ingest_before(
        &self,
        device_id: &str,
        value: Option<f64>,
        deadline: Instant,
    ) -> Result<IngestOutcome, IngestError> {
        if device_id.is_empty() {
            return Err(IngestError::InvalidDeviceId);
        }

        let value = match value.filter(|v| v.is_finite()) {
            Some(v) => v,
            None => {
                log::debug!("Device {} has no value to aggregate, skipping", device_id);
                return Ok(IngestOutcome::NothingToAggregate);
            }
        };

        let _guard = self.locks.acquire(device_id).await;

        let mut window = match self
            .call(
                StoreOperation::Get,
                deadline,
                self.store.get_before(device_id, deadline),
            )
            .await
        {
            Ok(values) => DeviceWindow::from_values(device_id, values),
            Err(IngestError::Store(StoreError::NotFound)) => {
                log::debug!("No window stored for {}, starting empty", device_id);
                DeviceWindow::empty(device_id)
            }
            Err(e) => return Err(e),
        };

        self.provision(device_id, deadline).await?;

        window.push(value);
        let sum = window.sum();

        self.call(
            StoreOperation::Put,
            deadline,
            self.store.put_before(device_id, &window.values, deadline),
        )
        .await?;

        log::debug!(
            "Device {} has accumulated {:?} with sum {}",
            device_id,
            window.values,
            sum
        );

        Ok(IngestOutcome::Aggregated(AggregateResult {
            device_id: window.device_id,
            window: window.values,
            sum,
        }))
    }

    /// Ingest a JSON reading and, on success, write the sum back into it
    pub async fn ingest_reading(
        &self,
        field: &AggregateField,
        reading: &mut Value,
    ) -> Result<IngestOutcome, IngestError> {
        let extracted = field
            .extract(reading)
            .ok_or(IngestError::InvalidDeviceId)?;

        let outcome = self.ingest(&extracted.device_id, extracted.value).await?;
        if let IngestOutcome::Aggregated(result) = &outcome {
            field.attach(reading, result);
        }

        Ok(outcome)
    }

    async fn provision(&self, device_id: &str, deadline: Instant) -> Result<(), IngestError> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };

        if Instant::now() >= deadline {
            log::warn!("Deadline passed before provisioning device {}", device_id);
            return Err(IngestError::Timeout {
                operation: StoreOperation::CreateDevice,
            });
        }

        match registry.create_if_absent_before(device_id, deadline).await {
            Ok(()) | Err(StoreError::AlreadyExists) => Ok(()),
            Err(StoreError::Timeout) => {
                log::warn!("Provisioning device {} timed out", device_id);
                Err(IngestError::Timeout {
                    operation: StoreOperation::CreateDevice,
                })
            }
            Err(e) => {
                log::warn!("Failed to provision device {}: {}", device_id, e);
                Err(IngestError::ProvisioningFailed(e))
            }
        }
    }

    /// Await one store call, failing fast when `deadline` has already passed
    async fn call<T, F>(
        &self,
        operation: StoreOperation,
        deadline: Instant,
        fut: F,
    ) -> Result<T, IngestError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if Instant::now() >= deadline {
            log::warn!(
                "Deadline passed before {} store {}",
                self.store.backend_type(),
                operation.as_str()
            );
            return Err(IngestError::Timeout { operation });
        }

        match fut.await {
            Ok(value) => Ok(value),
            Err(StoreError::NotFound) => Err(IngestError::Store(StoreError::NotFound)),
            Err(StoreError::Timeout) => {
                log::warn!(
                    "{} store {} timed out",
                    self.store.backend_type(),
                    operation.as_str()
                );
                Err(IngestError::Timeout { operation })
            }
            Err(e) => {
                log::warn!(
                    "{} store {} failed: {}",
                    self.store.backend_type(),
                    operation.as_str(),
                    e
                );
                Err(IngestError::Store(e))
            }
        }
    }
}
