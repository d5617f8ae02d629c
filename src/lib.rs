//! devicewindow - per-device sliding-window aggregation for telemetry readings
//!
//! Each device keeps its last `WINDOW_CAPACITY` numeric readings in a
//! `WindowStore`. Every new reading is appended, the oldest is evicted once
//! the window is full, and the sum of the window is attached to the reading.

pub mod aggregate;
pub mod config;
pub mod pipeline;
pub mod store;

pub use aggregate::{
    AggregateField, AggregateResult, AggregateWindowProcessor, DeviceWindow, IngestError,
    IngestOutcome, WINDOW_CAPACITY,
};
pub use config::{BackendType, ConfigError, RuntimeConfig};
pub use store::{DeviceRegistry, StoreError, WindowStore};
