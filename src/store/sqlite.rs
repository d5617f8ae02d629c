use super::{DeviceRegistry, StoreError, WindowStore};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Lock wait for calls made without a deadline
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// WAL journaling with relaxed sync; each statement is still atomic.
fn apply_optimized_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    // journal_mode answers with the resulting mode, so read it back
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    log::debug!("SQLite journal_mode={}", mode);
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn)?;
    Ok(conn)
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `op` on the blocking pool, waiting on SQLite locks no longer than `deadline`
///
/// The budget is checked again once the connection mutex is held. A statement
/// still blocked when the budget runs out fails with `SQLITE_BUSY`, which maps
/// to `StoreError::Timeout` and commits nothing.
async fn run_blocking<T, F>(
    conn: &Arc<Mutex<Connection>>,
    deadline: Option<Instant>,
    op: F,
) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
{
    let conn = conn.clone();
    let deadline = deadline.map(Instant::into_std);

    tokio::task::spawn_blocking(move || {
        let conn = lock(&conn);

        let budget = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                if remaining.is_zero() {
                    return Err(StoreError::Timeout);
                }
                remaining.min(BUSY_TIMEOUT)
            }
            None => BUSY_TIMEOUT,
        };
        conn.busy_timeout(budget)?;

        op(&*conn)
    })
    .await
    .map_err(|e| StoreError::Unavailable(format!("SQLite task failed: {}", e)))?
}

fn read_window(conn: &Connection, device_id: &str) -> Result<Vec<f64>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT window_values FROM device_windows WHERE device_id = ?1",
            params![device_id],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Err(StoreError::NotFound),
    }
}

fn write_window(conn: &Connection, device_id: &str, json: &str) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO device_windows (device_id, window_values, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(device_id) DO UPDATE SET
            window_values = excluded.window_values,
            updated_at = excluded.updated_at",
        params![device_id, json, now],
    )?;

    Ok(())
}

fn register_device(conn: &Connection, device_id: &str) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp();

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO devices (device_id, created_at) VALUES (?1, ?2)",
        params![device_id, now],
    )?;

    if inserted == 0 {
        return Err(StoreError::AlreadyExists);
    }

    log::debug!("Registered device {}", device_id);
    Ok(())
}

/// SQLite-backed window store
///
/// Windows are stored as a JSON array per device. `put` is a single UPSERT,
/// so a window is either fully replaced or left untouched. Statements run on
/// the blocking pool so a locked database never stalls the async workers.
pub struct SqliteWindowStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWindowStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = open_connection(db_path.as_ref())?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS device_windows (
                device_id TEXT PRIMARY KEY NOT NULL,
                window_values TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        log::info!(
            "✅ SQLite window store initialized: {}",
            db_path.as_ref().display()
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl WindowStore for SqliteWindowStore {
    async fn get(&self, device_id: &str) -> Result<Vec<f64>, StoreError> {
        let device_id = device_id.to_string();
        run_blocking(&self.conn, None, move |conn| read_window(conn, &device_id)).await
    }

    async fn put(&self, device_id: &str, values: &[f64]) -> Result<(), StoreError> {
        let device_id = device_id.to_string();
        let json = serde_json::to_string(values)?;
        run_blocking(&self.conn, None, move |conn| {
            write_window(conn, &device_id, &json)
        })
        .await
    }

    async fn get_before(
        &self,
        device_id: &str,
        deadline: Instant,
    ) -> Result<Vec<f64>, StoreError> {
        let device_id = device_id.to_string();
        run_blocking(&self.conn, Some(deadline), move |conn| {
            read_window(conn, &device_id)
        })
        .await
    }

    async fn put_before(
        &self,
        device_id: &str,
        values: &[f64],
        deadline: Instant,
    ) -> Result<(), StoreError> {
        let device_id = device_id.to_string();
        let json = serde_json::to_string(values)?;
        run_blocking(&self.conn, Some(deadline), move |conn| {
            write_window(conn, &device_id, &json)
        })
        .await
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

/// SQLite-backed device registry
pub struct SqliteDeviceRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDeviceRegistry {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = open_connection(db_path.as_ref())?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS devices (
                device_id TEXT PRIMARY KEY NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        log::info!("✅ SQLite device registry initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl DeviceRegistry for SqliteDeviceRegistry {
    async fn create_if_absent(&self, device_id: &str) -> Result<(), StoreError> {
        let device_id = device_id.to_string();
        run_blocking(&self.conn, None, move |conn| register_device(conn, &device_id)).await
    }

    async fn create_if_absent_before(
        &self,
        device_id: &str,
        deadline: Instant,
    ) -> Result<(), StoreError> {
        let device_id = device_id.to_string();
        run_blocking(&self.conn, Some(deadline), move |conn| {
            register_device(conn, &device_id)
        })
        .await
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
