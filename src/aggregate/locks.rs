//! Per-device serialization of read-modify-write cycles

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug)]
struct LockEntry {
    lock: Arc<AsyncMutex<()>>,
    /// Holders plus waiters, including waiters not yet polled
    users: usize,
}

/// Table of async mutexes keyed by device id
///
/// Entries exist only while some caller holds or waits on them.
#[derive(Debug, Default)]
pub struct DeviceLocks {
    locks: Mutex<HashMap<String, LockEntry>>,
}

/// Held for the duration of one ingestion; releases and prunes on drop
///
/// Also created before waiting, so a cancelled `acquire` gives its slot back.
pub struct DeviceLockGuard<'a> {
    owner: &'a DeviceLocks,
    device_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other ingestion for `device_id` is in flight
    pub async fn acquire(&self, device_id: &str) -> DeviceLockGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            let entry = locks
                .entry(device_id.to_string())
                .or_insert_with(|| LockEntry {
                    lock: Arc::new(AsyncMutex::new(())),
                    users: 0,
                });
            entry.users += 1;
            entry.lock.clone()
        };

        let mut pending = DeviceLockGuard {
            owner: self,
            device_id: device_id.to_string(),
            guard: None,
        };
        pending.guard = Some(lock.lock_owned().await);
        pending
    }

    /// Number of devices with an in-flight or waiting ingestion
    pub fn active_devices(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        // Map lock first: no caller can join the entry while we inspect it
        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        self.guard.take();

        let unused = match locks.get_mut(&self.device_id) {
            Some(entry) => {
                entry.users -= 1;
                entry.users == 0
            }
            None => false,
        };
        if unused {
            locks.remove(&self.device_id);
        }
    }
}
