//! SQLite archive for latency records
//!
//! The archive sits behind a bounded queue drained by a background writer, so
//! a slow or unavailable database never stalls ingest. Every database call is
//! wrapped in a timeout and reports `TelemetryError::Timeout` when it expires.

use crate::error::{Result, TelemetryError};
use crate::store::LatencyStore;
use crate::types::{LatencyRecord, OrderStatus, OrderType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Persistent home for records evicted from (or restored into) memory
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LatencyArchive: Send + Sync {
    /// Persist a batch; already archived ids are ignored
    async fn persist(&self, records: &[Arc<LatencyRecord>]) -> Result<()>;

    /// Most recent `limit` records, oldest first
    async fn load_recent(&self, limit: usize) -> Result<Vec<LatencyRecord>>;

    /// Delete rows older than `cutoff`, returning how many were removed
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Highest archived id, if any row exists
    async fn max_id(&self) -> Result<Option<u64>>;
}

#[derive(Debug, sqlx::FromRow)]
struct ArchivedRow {
    id: i64,
    order_id: String,
    broker: String,
    symbol: String,
    order_type: String,
    timestamp_ms: i64,
    rtt_ms: f64,
    total_latency_ms: f64,
    validation_latency_ms: f64,
    response_latency_ms: f64,
    overhead_ms: f64,
    status: String,
    error: Option<String>,
}

impl TryFrom<ArchivedRow> for LatencyRecord {
    type Error = TelemetryError;

    fn try_from(row: ArchivedRow) -> Result<Self> {
        let timestamp = DateTime::from_timestamp_millis(row.timestamp_ms).ok_or_else(|| {
            TelemetryError::validation("timestamp", format!("out of range: {}", row.timestamp_ms))
        })?;
        let id = u64::try_from(row.id)
            .map_err(|_| TelemetryError::validation("id", format!("negative id {}", row.id)))?;

        Ok(LatencyRecord {
            id,
            order_id: row.order_id,
            broker: row.broker,
            symbol: row.symbol,
            order_type: OrderType::normalize(&row.order_type),
            timestamp,
            rtt_ms: row.rtt_ms,
            total_latency_ms: row.total_latency_ms,
            validation_latency_ms: row.validation_latency_ms,
            response_latency_ms: row.response_latency_ms,
            overhead_ms: row.overhead_ms,
            status: OrderStatus::from_str(&row.status)?,
            error: row.error,
        })
    }
}

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS order_latency (
    id INTEGER PRIMARY KEY,
    order_id TEXT NOT NULL,
    broker TEXT NOT NULL,
    symbol TEXT NOT NULL,
    order_type TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    rtt_ms REAL NOT NULL,
    total_latency_ms REAL NOT NULL,
    validation_latency_ms REAL NOT NULL,
    response_latency_ms REAL NOT NULL,
    overhead_ms REAL NOT NULL,
    status TEXT NOT NULL,
    error TEXT
)
"#;

const CREATE_ORDER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_order_latency_order_id ON order_latency (order_id)";

const CREATE_TIME_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_order_latency_timestamp ON order_latency (timestamp_ms)";

/// sqlx-backed archive
pub struct SqliteArchive {
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteArchive {
    /// Open (creating if needed) the database at `path`
    pub async fn connect(path: &str, timeout: Duration) -> Result<Self> {
        let expanded = shellexpand::tilde(path).into_owned();
        if let Some(parent) = Path::new(&expanded).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&expanded)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        let archive = Self { pool, timeout };
        archive.migrate().await?;
        tracing::info!("Latency archive opened at {}", expanded);
        Ok(archive)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory(timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // one connection, otherwise every connection gets its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        let archive = Self { pool, timeout };
        archive.migrate().await?;
        Ok(archive)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in [CREATE_TABLE, CREATE_ORDER_INDEX, CREATE_TIME_INDEX] {
            self.bounded("migrate", sqlx::query(statement).execute(&self.pool))
                .await?;
        }
        Ok(())
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(TelemetryError::from),
            Err(_) => Err(TelemetryError::Timeout {
                operation,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = self
            .bounded(
                "count",
                sqlx::query_scalar("SELECT COUNT(*) FROM order_latency").fetch_one(&self.pool),
            )
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl LatencyArchive for SqliteArchive {
    async fn persist(&self, records: &[Arc<LatencyRecord>]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let pool = &self.pool;
        self.bounded("persist", async move {
            let mut tx = pool.begin().await?;
            for record in records {
                sqlx::query(
                    "INSERT OR IGNORE INTO order_latency (
                        id, order_id, broker, symbol, order_type, timestamp_ms,
                        rtt_ms, total_latency_ms, validation_latency_ms,
                        response_latency_ms, overhead_ms, status, error
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(record.id as i64)
                .bind(&record.order_id)
                .bind(&record.broker)
                .bind(&record.symbol)
                .bind(record.order_type.as_str())
                .bind(record.timestamp.timestamp_millis())
                .bind(record.rtt_ms)
                .bind(record.total_latency_ms)
                .bind(record.validation_latency_ms)
                .bind(record.response_latency_ms)
                .bind(record.overhead_ms)
                .bind(record.status.as_str())
                .bind(record.error.as_deref())
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        })
        .await
    }

    async fn load_recent(&self, limit: usize) -> Result<Vec<LatencyRecord>> {
        let rows: Vec<ArchivedRow> = self
            .bounded(
                "load_recent",
                sqlx::query_as(
                    "SELECT id, order_id, broker, symbol, order_type, timestamp_ms,
                            rtt_ms, total_latency_ms, validation_latency_ms,
                            response_latency_ms, overhead_ms, status, error
                     FROM order_latency ORDER BY id DESC LIMIT ?",
                )
                .bind(limit.min(i64::MAX as usize) as i64)
                .fetch_all(&self.pool),
            )
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            match LatencyRecord::try_from(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable archived record: {}", e),
            }
        }
        Ok(records)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = self
            .bounded(
                "purge",
                sqlx::query("DELETE FROM order_latency WHERE timestamp_ms < ?")
                    .bind(cutoff.timestamp_millis())
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn max_id(&self) -> Result<Option<u64>> {
        let max: Option<i64> = self
            .bounded(
                "max_id",
                sqlx::query_scalar("SELECT MAX(id) FROM order_latency").fetch_one(&self.pool),
            )
            .await?;
        Ok(max.map(|id| id.max(0) as u64))
    }
}

/// Seed `store` from the archive before any new record is accepted.
///
/// Id assignment always resumes after the archive's highest id, even when the
/// window itself cannot be loaded, so new rows never collide with archived
/// ones. An error means the archive's id range is unknown and it must not be
/// written to.
pub async fn restore_from_archive(
    store: &LatencyStore,
    archive: &dyn LatencyArchive,
    limit: usize,
) -> Result<usize> {
    let max_id = archive.max_id().await?;

    let restored = match archive.load_recent(limit).await {
        Ok(records) => store.restore(records),
        Err(e) => {
            tracing::warn!("Could not restore from archive, starting empty: {}", e);
            0
        }
    };

    if let Some(max_id) = max_id {
        store.resume_after(max_id);
    }
    Ok(restored)
}

/// Non-blocking producer side of the archive queue
#[derive(Clone)]
pub struct ArchiveHandle {
    tx: mpsc::Sender<Arc<LatencyRecord>>,
}

impl ArchiveHandle {
    /// Queue a record for persistence; drops it if the queue is full
    pub fn enqueue(&self, record: Arc<LatencyRecord>) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                tracing::warn!("Archive queue full, record {} not persisted", record.id);
                false
            }
            Err(TrySendError::Closed(record)) => {
                tracing::warn!("Archive writer stopped, record {} not persisted", record.id);
                false
            }
        }
    }
}

/// Spawn the background writer; it exits once every handle is dropped
pub fn spawn_archive_writer(
    archive: Arc<dyn LatencyArchive>,
    queue_capacity: usize,
    batch_size: usize,
) -> (ArchiveHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let task = tokio::spawn(run_writer(archive, rx, batch_size.max(1)));
    (ArchiveHandle { tx }, task)
}

/// Wait for the writer to drain after the last `ArchiveHandle` is dropped.
///
/// Returns false if it had not finished within `timeout`.
pub async fn flush_archive_writer(writer: JoinHandle<()>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, writer).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("Archive writer failed: {}", e);
            false
        }
        Err(_) => {
            tracing::warn!("Archive flush timed out, queued records not persisted");
            false
        }
    }
}

async fn run_writer(
    archive: Arc<dyn LatencyArchive>,
    mut rx: mpsc::Receiver<Arc<LatencyRecord>>,
    batch_size: usize,
) {
    let mut batch = Vec::with_capacity(batch_size);
    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }

        match archive.persist(&batch).await {
            Ok(()) => tracing::debug!("Archived {} latency records", batch.len()),
            Err(e) => tracing::warn!("Dropping {} records, archive write failed: {}", batch.len(), e),
        }
        batch.clear();
    }
    tracing::info!("Archive writer stopped");
}
