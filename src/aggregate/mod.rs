//! Aggregate Core - per-device sliding-window sums
//!
//! # Architecture
//!
//! ```text
//! JSON reading → AggregateField::extract (device id + value)
//!     ↓
//! AggregateWindowProcessor::ingest
//!     ↓  (per-device lock held)
//! WindowStore::get → DeviceRegistry::create_if_absent → push/evict/sum → WindowStore::put
//!     ↓
//! AggregateResult → AggregateField::attach (sum written into the reading)
//! ```

pub mod field;
pub mod locks;
pub mod processor;
pub mod types;
pub mod window;

pub use field::{AggregateField, ExtractedReading};
pub use locks::DeviceLocks;
pub use processor::{AggregateWindowProcessor, IngestError, StoreOperation, DEFAULT_STORE_TIMEOUT};
pub use types::{AggregateResult, DeviceWindow, IngestOutcome, WINDOW_CAPACITY};
