//! modapto-storage: SQLite-based persistence for scheduled tasks and
//! smart-service results.
//!
//! The scheduler and the response processors only see the [`TaskStore`] and
//! [`ResultStore`] traits. [`ModaptoStorage`] owns the SQLite connection and
//! hands out the concrete stores, which share it.

mod results;
mod tasks;

pub use results::SqliteThresholdResultStore;
pub use tasks::SqliteTaskStore;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use modapto_types::ScheduledTask;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Record has no id")]
    MissingId,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable record of every recurring task, keyed by task id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or update a task. Assigns an id on first save.
    async fn save(&self, task: &ScheduledTask) -> Result<ScheduledTask>;
    async fn find_all(&self) -> Result<Vec<ScheduledTask>>;
    async fn find_by_id(&self, id: &str) -> Result<Option<ScheduledTask>>;
    /// Tasks with the given type tag, oldest first.
    async fn find_by_type(&self, tag: &str, offset: u64, limit: u32)
    -> Result<Vec<ScheduledTask>>;
    async fn count_by_type(&self, tag: &str) -> Result<u64>;
    async fn delete(&self, task: &ScheduledTask) -> Result<()>;
}

/// Durable store for one kind of decoded smart-service result.
#[async_trait]
pub trait ResultStore<T>: Send + Sync {
    /// Persist a result, returning it with its assigned id.
    async fn save(&self, result: &T) -> Result<T>;
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id TEXT PRIMARY KEY,
        task_type TEXT NOT NULL,
        request_body TEXT NOT NULL,
        frequency_unit TEXT NOT NULL,
        frequency_value INTEGER NOT NULL,
        module_id TEXT NOT NULL,
        smart_service_id TEXT NOT NULL,
        next_execution_time INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_type
        ON scheduled_tasks (task_type, created_at);

    CREATE TABLE IF NOT EXISTS threshold_maintenance_results (
        id TEXT PRIMARY KEY,
        module_id TEXT NOT NULL,
        smart_service_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        recommendation TEXT NOT NULL,
        details TEXT NOT NULL
    );";

/// SQLite-based storage for modapto tasks and results.
pub struct ModaptoStorage {
    conn: Arc<Mutex<Connection>>,
}

impl ModaptoStorage {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Store for scheduled tasks.
    pub fn task_store(&self) -> SqliteTaskStore {
        SqliteTaskStore::new(self.conn.clone())
    }

    /// Store for threshold-based maintenance results.
    pub fn threshold_results(&self) -> SqliteThresholdResultStore {
        SqliteThresholdResultStore::new(self.conn.clone())
    }
}

/// Run a closure against the connection on the blocking pool.
async fn with_conn<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let conn = conn.blocking_lock();
        f(&conn)
    })
    .await?
}
