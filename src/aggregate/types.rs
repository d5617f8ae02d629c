//! Core data structures for per-device window aggregation

use serde::{Deserialize, Serialize};

/// Maximum number of values retained per device window
pub const WINDOW_CAPACITY: usize = 10;

/// Bounded, chronologically ordered history of one device's readings
///
/// `values[0]` is the oldest retained reading, the last element the newest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceWindow {
    pub device_id: String,
    pub values: Vec<f64>,
}

impl DeviceWindow {
    /// Empty window, used when the store has no prior state for the device
    pub fn empty(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            values: Vec::with_capacity(WINDOW_CAPACITY + 1),
        }
    }

    pub fn from_values(device_id: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            device_id: device_id.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of a successful, persisted ingestion
///
/// `window` is a snapshot owned by the caller. Mutating it has no effect on
/// the stored copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub device_id: String,
    pub window: Vec<f64>,
    pub sum: f64,
}

/// Outcome of `AggregateWindowProcessor::ingest`
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Window updated and persisted
    Aggregated(AggregateResult),

    /// Reading carried no finite value; no collaborator was touched
    NothingToAggregate,
}

impl IngestOutcome {
    pub fn into_result(self) -> Option<AggregateResult> {
        match self {
            IngestOutcome::Aggregated(result) => Some(result),
            IngestOutcome::NothingToAggregate => None,
        }
    }
}
