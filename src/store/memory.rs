//! In-memory window store and device registry

use super::{DeviceRegistry, StoreError, WindowStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Process-local window store
///
/// Every `put` swaps the whole vector under the write lock, so readers never
/// observe a partially written window.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: RwLock<HashMap<String, Vec<f64>>>,
    get_count: AtomicU64,
    put_count: AtomicU64,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_count(&self) -> u64 {
        self.get_count.load(Ordering::Relaxed)
    }

    pub fn put_count(&self) -> u64 {
        self.put_count.load(Ordering::Relaxed)
    }

    /// Number of devices with a stored window
    pub async fn device_count(&self) -> usize {
        self.windows.read().await.len()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn get(&self, device_id: &str) -> Result<Vec<f64>, StoreError> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.windows
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn put(&self, device_id: &str, values: &[f64]) -> Result<(), StoreError> {
        self.put_count.fetch_add(1, Ordering::Relaxed);
        self.windows
            .write()
            .await
            .insert(device_id.to_string(), values.to_vec());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "Memory"
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeviceRegistry {
    devices: RwLock<HashSet<String>>,
    create_count: AtomicU64,
}

impl MemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, device_id: &str) -> bool {
        self.devices.read().await.contains(device_id)
    }

    pub fn create_count(&self) -> u64 {
        self.create_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeviceRegistry for MemoryDeviceRegistry {
    async fn create_if_absent(&self, device_id: &str) -> Result<(), StoreError> {
        self.create_count.fetch_add(1, Ordering::Relaxed);
        if self.devices.write().await.insert(device_id.to_string()) {
            log::debug!("Registered device {}", device_id);
            Ok(())
        } else {
            Err(StoreError::AlreadyExists)
        }
    }

    fn backend_type(&self) -> &'static str {
        "Memory"
    }
}
