//! Transport-side plumbing around the aggregate core
//!
//! - `ingestion` - channel-fed, per-device ordered workers
//! - `backoff` - retry delays for whole-ingestion retries

pub mod backoff;
pub mod ingestion;

pub use backoff::{ExponentialBackoff, MaxRetriesExceeded};
pub use ingestion::{start_ingestion, IngestionOptions, IngestionStats};
