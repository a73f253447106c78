pub mod config;
pub mod pool;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::params_from_iter;

use crate::core::{Result, Row, Value};
use crate::interface::Executor;
use config::LedgerConfig;

/// Database connection handle
///
/// Wraps one SQLite connection. Every call hops onto the blocking thread pool,
/// so a statement waiting on the write lock never stalls the async runtime.
pub struct Connection {
    /// Unique connection ID
    id: u64,
    opened_at: Instant,
    inner: Arc<Mutex<rusqlite::Connection>>,
}

impl Connection {
    /// Open a connection and apply the per-connection pragmas.
    ///
    /// Blocking; the pool calls this from `spawn_blocking`.
    pub(crate) fn open(id: u64, config: &LedgerConfig) -> Result<Self> {
        let conn = rusqlite::Connection::open(&config.path)?;
        conn.busy_timeout(config.busy_timeout)?;
        if config.foreign_keys {
            conn.pragma_update(None, "foreign_keys", "ON")?;
        }
        if config.wal {
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        }

        Ok(Self {
            id,
            opened_at: Instant::now(),
            inner: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get connection ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Time since the connection was opened
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let conn = inner.lock()?;
            f(&conn)
        })
        .await?
    }

    /// Execute one or more statements without parameters (schema, pragmas, transaction control).
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| Ok(conn.execute_batch(&sql)?)).await
    }

    /// Take the write lock now rather than at the first write.
    pub async fn begin_immediate(&self) -> Result<()> {
        self.execute_batch("BEGIN IMMEDIATE").await
    }

    pub async fn commit(&self) -> Result<()> {
        self.execute_batch("COMMIT").await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.execute_batch("ROLLBACK").await
    }

    /// True while a transaction is open. `None` when the connection is busy
    /// on another thread and the state cannot be observed without blocking.
    pub fn try_in_transaction(&self) -> Option<bool> {
        self.inner.try_lock().ok().map(|conn| !conn.is_autocommit())
    }
}

#[async_trait]
impl Executor for Connection {
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize> {
        let sql = sql.to_string();
        self.with_conn(move |conn| Ok(conn.execute(&sql, params_from_iter(params.iter()))?))
            .await
    }

    async fn query_row(&self, sql: &str, params: Vec<Value>) -> Result<Option<Row>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let width = stmt.column_count();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            match rows.next()? {
                Some(row) => Ok(Some(Row::from_sqlite(row, width)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn query_rows(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let width = stmt.column_count();
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| Row::from_sqlite(row, width))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}
