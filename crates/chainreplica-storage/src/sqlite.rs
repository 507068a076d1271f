//! SQLite storage backend for ChainReplica.
//!
//! Persists replicated records and namespace manager checkpoints to a single
//! SQLite file, and carries the control channel through a `control_events`
//! table that is polled while a listener is subscribed.
//!
//! # Usage
//! ```rust,no_run
//! use chainreplica_storage::sqlite::SqliteDatabase;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let db = SqliteDatabase::open("./replica.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let db = SqliteDatabase::in_memory().await?;
//!
//! // Ask a running replica to follow a namespace.
//! db.publish_control("subscribe:abcd:1700000000").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use chainreplica_core::error::ReplicaError;
use chainreplica_core::namespace::Namespace;
use chainreplica_core::storage::{ControlReceiver, Database};
use chainreplica_core::types::DataId;

/// Default delay between two polls of the control table.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// SQLite-backed storage for replicated records, checkpoints and control
/// events.
pub struct SqliteDatabase {
    pool: SqlitePool,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteDatabase {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./replica.db"`) or a full
    /// SQLite URL (`"sqlite:./replica.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ReplicaError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        Self::with_pool(pool).await
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the database is closed. The pool keeps a single
    /// connection alive, since every SQLite memory connection is a separate
    /// database.
    pub async fn in_memory() -> Result<Self, ReplicaError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, ReplicaError> {
        let db = Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poller: Mutex::new(None),
        };
        db.init_schema().await?;
        Ok(db)
    }

    /// Set how often the control table is polled.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ReplicaError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS replicated_data (
                namespace BLOB    NOT NULL,
                data_id   INTEGER NOT NULL,
                payload   BLOB    NOT NULL,
                PRIMARY KEY (namespace, data_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS namespace_managers (
                namespace BLOB PRIMARY KEY,
                state     BLOB NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS control_events (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        Ok(())
    }

    // ─── Control events ─────────────────────────────────────────────────────────

    /// Enqueue a control message for the replica listening on this database.
    pub async fn publish_control(&self, payload: &str) -> Result<(), ReplicaError> {
        sqlx::query("INSERT INTO control_events (payload) VALUES (?)")
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        debug!(payload, "control event queued");
        Ok(())
    }

    /// Control messages not yet consumed, oldest first.
    pub async fn pending_control(&self) -> Result<Vec<String>, ReplicaError> {
        let rows = sqlx::query("SELECT payload FROM control_events ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        Ok(rows.iter().map(|r| r.get::<String, _>("payload")).collect())
    }

    // ─── Replicated data ────────────────────────────────────────────────────────

    pub async fn get_data(&self, namespace: Namespace, id: DataId) -> Result<Option<Vec<u8>>, ReplicaError> {
        let row = sqlx::query(
            "SELECT payload FROM replicated_data
             WHERE namespace = ? AND data_id = ?",
        )
        .bind(&namespace.as_bytes()[..])
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>("payload")))
    }

    /// Number of records stored for a namespace.
    pub async fn data_count(&self, namespace: Namespace) -> Result<u64, ReplicaError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM replicated_data WHERE namespace = ?")
            .bind(&namespace.as_bytes()[..])
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    fn stop_poller(&self) -> bool {
        match self.poller.lock().unwrap().take() {
            Some(poller) => {
                poller.abort();
                true
            }
            None => false,
        }
    }
}

/// Deliver queued control events until the receiver goes away.
async fn poll_control(pool: SqlitePool, tx: mpsc::UnboundedSender<String>, interval: Duration) {
    loop {
        match deliver_control(&pool, &tx).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("control receiver dropped, stopping poller");
                return;
            }
            Err(e) => error!(error = %e, "failed to poll control events"),
        }
        tokio::time::sleep(interval).await;
    }
}

/// Send every queued control event, oldest first, and remove the ones that
/// were sent. Events left unsent stay queued for the next subscriber.
///
/// Returns `false` once the receiver is gone.
async fn deliver_control(pool: &SqlitePool, tx: &mpsc::UnboundedSender<String>) -> Result<bool, ReplicaError> {
    if tx.is_closed() {
        return Ok(false);
    }
    let rows = sqlx::query("SELECT id, payload FROM control_events ORDER BY id")
        .fetch_all(pool)
        .await
        .map_err(|e| ReplicaError::Storage(e.to_string()))?;

    let mut last_sent = None;
    let mut open = true;
    for row in rows {
        if tx.send(row.get::<String, _>("payload")).is_err() {
            open = false;
            break;
        }
        last_sent = Some(row.get::<i64, _>("id"));
    }

    if let Some(last) = last_sent {
        sqlx::query("DELETE FROM control_events WHERE id <= ?")
            .bind(last)
            .execute(pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;
    }
    Ok(open)
}

// ─── Database impl ───────────────────────────────────────────────────────────

#[async_trait]
impl Database for SqliteDatabase {
    async fn ping(&self) -> Result<(), ReplicaError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn store_data(&self, namespace: Namespace, id: DataId, data: &[u8]) -> Result<(), ReplicaError> {
        sqlx::query(
            "INSERT OR REPLACE INTO replicated_data (namespace, data_id, payload)
             VALUES (?, ?, ?)",
        )
        .bind(&namespace.as_bytes()[..])
        .bind(id as i64)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn delete_data(&self, namespace: Namespace, id: DataId) -> Result<(), ReplicaError> {
        sqlx::query("DELETE FROM replicated_data WHERE namespace = ? AND data_id = ?")
            .bind(&namespace.as_bytes()[..])
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn save_manager(&self, namespace: Namespace, checkpoint: &[u8]) -> Result<(), ReplicaError> {
        sqlx::query("INSERT OR REPLACE INTO namespace_managers (namespace, state) VALUES (?, ?)")
            .bind(&namespace.as_bytes()[..])
            .bind(checkpoint)
            .execute(&self.pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        debug!(namespace = %namespace, bytes = checkpoint.len(), "checkpoint saved");
        Ok(())
    }

    async fn load_managers(&self) -> Result<Vec<(Namespace, Vec<u8>)>, ReplicaError> {
        let rows = sqlx::query("SELECT namespace, state FROM namespace_managers ORDER BY namespace")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        let mut managers = Vec::with_capacity(rows.len());
        for row in rows {
            let key: Vec<u8> = row.get("namespace");
            match Namespace::from_slice(&key) {
                Ok(namespace) => managers.push((namespace, row.get::<Vec<u8>, _>("state"))),
                Err(e) => warn!(key = %hex::encode(&key), error = %e, "skipping checkpoint with malformed namespace"),
            }
        }
        Ok(managers)
    }

    async fn delete_manager(&self, namespace: Namespace) -> Result<(), ReplicaError> {
        sqlx::query("DELETE FROM namespace_managers WHERE namespace = ?")
            .bind(&namespace.as_bytes()[..])
            .execute(&self.pool)
            .await
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn subscribe_control(&self) -> Result<ControlReceiver, ReplicaError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_control(self.pool.clone(), tx, self.poll_interval));
        if let Some(old) = self.poller.lock().unwrap().replace(poller) {
            old.abort();
        }
        Ok(rx)
    }

    async fn unsubscribe_control(&self) -> Result<(), ReplicaError> {
        self.stop_poller();
        Ok(())
    }

    async fn close(&self) -> Result<(), ReplicaError> {
        self.stop_poller();
        self.pool.close().await;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
