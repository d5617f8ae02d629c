//! Pipeline ingestion - channel-driven adapter in front of the processor
//!
//! Main loop:
//! 1. Receives JSON readings via mpsc channel
//! 2. Routes each reading to a worker chosen by hashing its device id
//! 3. Workers ingest in arrival order, retrying transient failures
//! 4. Enriched readings are forwarded to the output channel
//!
//! Hash routing keeps every reading of a device on the same worker, so a
//! device's window sees its readings in arrival order while different
//! devices proceed in parallel.

use super::backoff::ExponentialBackoff;
use crate::aggregate::{AggregateField, AggregateWindowProcessor, IngestOutcome};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub field: AggregateField,
    /// Number of ordered workers (at least 1)
    pub workers: usize,
    /// Per-worker queue depth
    pub worker_buffer: usize,
    /// Retry policy template, cloned fresh for every reading
    pub retry: ExponentialBackoff,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            field: AggregateField::default(),
            workers: 4,
            worker_buffer: 256,
            retry: ExponentialBackoff::new(100, 2_000, 3),
        }
    }
}

/// Counters reported when ingestion stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub received: u64,
    /// Window updated and sum attached
    pub aggregated: u64,
    /// Forwarded unchanged: nothing to aggregate
    pub skipped: u64,
    /// Dropped: no device id
    pub rejected: u64,
    /// Dropped: ingestion failed (after retries, when transient)
    pub failed: u64,
}

impl IngestionStats {
    fn merge(&mut self, other: &IngestionStats) {
        self.aggregated += other.aggregated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

fn worker_index(device_id: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    device_id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

/// Run ingestion until `rx` closes, then drain the workers
///
/// Returns the combined counters of the dispatcher and all workers.
pub async fn start_ingestion(
    mut rx: mpsc::Receiver<Value>,
    processor: Arc<AggregateWindowProcessor>,
    out: mpsc::Sender<Value>,
    options: IngestionOptions,
) -> IngestionStats {
    let workers = options.workers.max(1);

    log::info!("🚀 Starting ingestion");
    log::info!("   ├─ Workers: {}", workers);
    log::info!(
        "   ├─ Field: {} → {} (keyed by {})",
        options.field.value_field,
        options.field.sum_field,
        options.field.device_field
    );
    log::info!("   └─ Store timeout: {}ms", processor.store_timeout().as_millis());

    let mut senders = Vec::with_capacity(workers);
    let mut handles: Vec<JoinHandle<IngestionStats>> = Vec::with_capacity(workers);

    for id in 0..workers {
        let (tx, worker_rx) = mpsc::channel::<Value>(options.worker_buffer.max(1));
        senders.push(tx);
        handles.push(tokio::spawn(run_worker(
            id,
            worker_rx,
            processor.clone(),
            out.clone(),
            options.field.clone(),
            options.retry.clone(),
        )));
    }
    drop(out);

    let mut stats = IngestionStats::default();
    let mut window_count = 0u64;
    let mut last_log_time = Instant::now();

    while let Some(reading) = rx.recv().await {
        stats.received += 1;
        window_count += 1;

        let device_id = match options.field.extract(&reading) {
            Some(extracted) => extracted.device_id,
            None => {
                log::warn!(
                    "⚠️  Reading has no '{}' field, dropping",
                    options.field.device_field
                );
                stats.rejected += 1;
                continue;
            }
        };

        let idx = worker_index(&device_id, workers);
        if senders[idx].send(reading).await.is_err() {
            log::error!("❌ Worker {} stopped, dropping reading for {}", idx, device_id);
            stats.failed += 1;
        }

        // Log throughput every 10 seconds
        if last_log_time.elapsed().as_secs() >= 10 {
            let per_sec = window_count as f64 / last_log_time.elapsed().as_secs_f64();
            log::info!(
                "📊 Ingestion rate: {:.1} readings/sec (total: {})",
                per_sec,
                stats.received
            );
            last_log_time = Instant::now();
            window_count = 0;
        }
    }

    log::info!("⚠️  Reading channel closed, draining workers...");
    drop(senders);

    for handle in handles {
        match handle.await {
            Ok(worker_stats) => stats.merge(&worker_stats),
            Err(e) => log::error!("❌ Ingestion worker panicked: {}", e),
        }
    }

    log::info!(
        "✅ Ingestion stopped: {} received, {} aggregated, {} skipped, {} rejected, {} failed",
        stats.received,
        stats.aggregated,
        stats.skipped,
        stats.rejected,
        stats.failed
    );

    stats
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<Value>,
    processor: Arc<AggregateWindowProcessor>,
    out: mpsc::Sender<Value>,
    field: AggregateField,
    retry: ExponentialBackoff,
) -> IngestionStats {
    let mut stats = IngestionStats::default();

    while let Some(mut reading) = rx.recv().await {
        let mut backoff = retry.clone();

        let outcome = loop {
            match processor.ingest_reading(&field, &mut reading).await {
                Ok(outcome) => break Some(outcome),
                Err(e) if e.is_transient() => {
                    log::warn!("⚠️  Worker {} ingestion failed: {}", id, e);
                    if backoff.sleep().await.is_err() {
                        log::error!(
                            "❌ Worker {} giving up after {} retries: {}",
                            id,
                            backoff.attempts(),
                            e
                        );
                        break None;
                    }
                }
                Err(e) => {
                    log::error!("❌ Worker {} ingestion failed: {}", id, e);
                    break None;
                }
            }
        };

        match outcome {
            Some(IngestOutcome::Aggregated(_)) => stats.aggregated += 1,
            Some(IngestOutcome::NothingToAggregate) => stats.skipped += 1,
            None => {
                stats.failed += 1;
                continue;
            }
        }

        if out.send(reading).await.is_err() {
            log::debug!("Output channel closed, discarding enriched reading");
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryWindowStore, StoreError, WindowStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store whose first `failures` puts report the backend as unavailable
    struct FlakyStore {
        inner: MemoryWindowStore,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryWindowStore::new(),
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl WindowStore for FlakyStore {
        async fn get(&self, device_id: &str) -> Result<Vec<f64>, StoreError> {
            self.inner.get(device_id).await
        }

        async fn put(&self, device_id: &str, values: &[f64]) -> Result<(), StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("flaky".to_string()));
            }
            self.inner.put(device_id, values).await
        }

        fn backend_type(&self) -> &'static str {
            "Flaky"
        }
    }

    fn fast_options(workers: usize, retries: u32) -> IngestionOptions {
        IngestionOptions {
            workers,
            retry: ExponentialBackoff::new(1, 5, retries),
            ..Default::default()
        }
    }

    async fn run(
        processor: Arc<AggregateWindowProcessor>,
        readings: Vec<Value>,
        options: IngestionOptions,
    ) -> (IngestionStats, Vec<Value>) {
        let (tx, rx) = mpsc::channel(readings.len().max(1));
        let (out_tx, mut out_rx) = mpsc::channel(readings.len().max(1));

        let handle = tokio::spawn(start_ingestion(rx, processor, out_tx, options));
        for reading in readings {
            tx.send(reading).await.unwrap();
        }
        drop(tx);

        let stats = handle.await.unwrap();
        let mut outputs = Vec::new();
        while let Some(reading) = out_rx.recv().await {
            outputs.push(reading);
        }
        (stats, outputs)
    }

    #[test]
    fn test_worker_index_is_stable() {
        assert_eq!(worker_index("UNITTEST1", 4), worker_index("UNITTEST1", 4));
        assert!(worker_index("UNITTEST1", 4) < 4);
        assert_eq!(worker_index("anything", 1), 0);
    }

    #[tokio::test]
    async fn test_per_device_order_preserved() {
        let store = Arc::new(MemoryWindowStore::new());
        let processor = Arc::new(AggregateWindowProcessor::new(store.clone()));

        let mut readings = Vec::new();
        for i in 1..=12 {
            for device in ["D1", "D2", "D3"] {
                readings.push(json!({ "device": device, "tmp": i as f64 }));
            }
        }

        let (stats, outputs) = run(processor, readings, fast_options(3, 0)).await;

        assert_eq!(stats.received, 36);
        assert_eq!(stats.aggregated, 36);
        assert_eq!(outputs.len(), 36);

        let expected: Vec<f64> = (3..=12).map(f64::from).collect();
        for device in ["D1", "D2", "D3"] {
            assert_eq!(store.get(device).await.unwrap(), expected);
        }

        // Last output per device carries the final sum
        let mut last_sum: HashMap<String, f64> = HashMap::new();
        for reading in &outputs {
            last_sum.insert(
                reading["device"].as_str().unwrap().to_string(),
                reading["tmpsum"].as_f64().unwrap(),
            );
        }
        assert_eq!(last_sum["D1"], 75.0);
    }

    #[tokio::test]
    async fn test_skipped_and_rejected_readings() {
        let processor = Arc::new(AggregateWindowProcessor::new(Arc::new(MemoryWindowStore::new())));

        let readings = vec![
            json!({ "device": "D1", "tmp": null, "ctr": 1 }),
            json!({ "tmp": 3.0 }),
            json!({ "device": "D1", "tmp": 2.0 }),
        ];

        let (stats, outputs) = run(processor, readings, fast_options(2, 0)).await;

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.aggregated, 1);
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().any(|r| r["ctr"] == json!(1) && r.get("tmpsum").is_none()));
        assert!(outputs.iter().any(|r| r["tmpsum"] == json!(2.0)));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(FlakyStore::new(2));
        let processor = Arc::new(AggregateWindowProcessor::new(store.clone()));

        let readings = vec![json!({ "device": "D1", "tmp": 7.0 })];
        let (stats, outputs) = run(processor, readings, fast_options(1, 3)).await;

        assert_eq!(stats.aggregated, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(outputs[0]["tmpsum"], json!(7.0));
        assert_eq!(store.inner.get("D1").await.unwrap(), vec![7.0]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_reading() {
        let store = Arc::new(FlakyStore::new(10));
        let processor = Arc::new(AggregateWindowProcessor::new(store.clone()));

        let readings = vec![json!({ "device": "D1", "tmp": 7.0 })];
        let (stats, outputs) = run(processor, readings, fast_options(1, 2)).await;

        assert_eq!(stats.failed, 1);
        assert!(outputs.is_empty());
        assert!(matches!(store.inner.get("D1").await, Err(StoreError::NotFound)));
    }
}
