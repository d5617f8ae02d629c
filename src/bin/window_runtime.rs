//! Window Runtime - per-device sliding-window aggregation service
//!
//! Reads JSON readings (one per line) from stdin, keeps the last 10 values of
//! the aggregated field per device, and writes each reading back to stdout
//! with the window sum attached.
//!
//! Usage:
//!   cat readings.jsonl | cargo run --release --bin window_runtime
//!
//! Environment variables:
//!   WINDOW_BACKEND - memory | sqlite (default: memory)
//!   WINDOW_DB_PATH - SQLite database path (default: data/devicewindow.db)
//!   DEVICE_FIELD / AGGREGATE_FIELD / SUM_FIELD - (default: device / tmp / tmpsum)
//!   STORE_TIMEOUT_MS - Deadline for the store calls of one reading (default: 5000)
//!   INGEST_WORKERS - Ordered ingestion workers (default: 4)
//!   CHANNEL_BUFFER - Reading channel size (default: 1000)
//!   RETRY_INITIAL_MS / RETRY_MAX_MS / RETRY_MAX_ATTEMPTS - (default: 100 / 2000 / 3)
//!   RUST_LOG - Logging level (default: info, logs go to stderr)

use devicewindow::aggregate::AggregateWindowProcessor;
use devicewindow::config::{BackendType, RuntimeConfig};
use devicewindow::pipeline::{start_ingestion, ExponentialBackoff, IngestionOptions};
use devicewindow::store::{
    DeviceRegistry, MemoryDeviceRegistry, MemoryWindowStore, SqliteDeviceRegistry,
    SqliteWindowStore, WindowStore,
};
use log::{error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // stdout carries data, so logs must go to stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = RuntimeConfig::from_env()?;

    info!("🚀 Starting Window Runtime");
    info!("   ├─ Backend: {}", config.backend.as_str());
    if config.backend == BackendType::Sqlite {
        info!("   ├─ Database: {}", config.db_path);
    }
    info!(
        "   ├─ Aggregating: {} → {}",
        config.field.value_field, config.field.sum_field
    );
    info!("   ├─ Workers: {}", config.ingest_workers);
    info!("   └─ Store timeout: {}ms", config.store_timeout_ms);

    let (store, registry) = match config.backend {
        BackendType::Memory => (
            Arc::new(MemoryWindowStore::new()) as Arc<dyn WindowStore>,
            Arc::new(MemoryDeviceRegistry::new()) as Arc<dyn DeviceRegistry>,
        ),
        BackendType::Sqlite => (
            Arc::new(SqliteWindowStore::new(&config.db_path)?) as Arc<dyn WindowStore>,
            Arc::new(SqliteDeviceRegistry::new(&config.db_path)?) as Arc<dyn DeviceRegistry>,
        ),
    };
    info!("✅ {} window store ready", store.backend_type());

    let processor = Arc::new(
        AggregateWindowProcessor::new(store)
            .with_registry(registry)
            .with_store_timeout(config.store_timeout()),
    );

    let (tx, rx) = mpsc::channel::<Value>(config.channel_buffer);
    let (out_tx, mut out_rx) = mpsc::channel::<Value>(config.channel_buffer);

    let options = IngestionOptions {
        field: config.field.clone(),
        workers: config.ingest_workers,
        worker_buffer: (config.channel_buffer / config.ingest_workers).max(1),
        retry: ExponentialBackoff::new(
            config.retry_initial_ms,
            config.retry_max_ms,
            config.retry_max_attempts,
        ),
    };
    let ingestion = tokio::spawn(start_ingestion(rx, processor, out_tx, options));

    // Writer task: enriched readings to stdout as JSONL
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(reading) = out_rx.recv().await {
            let mut line = reading.to_string();
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                error!("❌ Failed to write to stdout: {}", e);
                break;
            }
        }
        let _ = stdout.flush().await;
    });

    info!("🔄 Reading from stdin (CTRL+C to stop)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(&line) {
                            Ok(reading) => {
                                if tx.send(reading).await.is_err() {
                                    error!("❌ Ingestion stopped unexpectedly");
                                    break;
                                }
                            }
                            Err(e) => warn!("⚠️  Failed to parse reading: {} ({})", line, e),
                        }
                    }
                    Ok(None) => {
                        info!("📭 stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("❌ stdin error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("⚠️  Received CTRL+C, shutting down...");
                break;
            }
        }
    }

    // Close the channel so ingestion drains and stops
    drop(tx);

    let stats = ingestion.await?;
    writer.await?;

    info!(
        "✅ Window runtime stopped ({} aggregated, {} failed)",
        stats.aggregated, stats.failed
    );
    Ok(())
}
