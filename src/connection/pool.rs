use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Connection, config::LedgerConfig};
use crate::core::{LedgerError, Result, Row, Value};
use crate::interface::Executor;

/// Connection pool
///
/// Hands out SQLite connections to the single database file. Shared freely for
/// reads and one-shot writes; the transaction coordinator takes a dedicated
/// connection out of it for the whole unit of work.
pub struct ConnectionPool {
    config: LedgerConfig,
    shared: Arc<PoolShared>,
    next_id: AtomicU64,
}

struct PoolShared {
    /// Available connections
    available: Mutex<VecDeque<PooledConnection>>,
    /// Total number of connections created and not yet discarded
    total_connections: AtomicUsize,
}

/// An idle connection waiting in the pool
struct PooledConnection {
    connection: Connection,
    last_used: Instant,
}

impl PooledConnection {
    fn new(connection: Connection) -> Self {
        Self {
            connection,
            last_used: Instant::now(),
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        if let Some(lifetime) = max_lifetime {
            self.connection.age() > lifetime
        } else {
            false
        }
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        if let Some(timeout) = idle_timeout {
            self.last_used.elapsed() > timeout
        } else {
            false
        }
    }
}

impl ConnectionPool {
    /// Create a new connection pool for the configured database file
    pub async fn new(config: LedgerConfig) -> Result<Self> {
        config.validate()?;

        let pool = Self {
            config,
            shared: Arc::new(PoolShared {
                available: Mutex::new(VecDeque::new()),
                total_connections: AtomicUsize::new(0),
            }),
            next_id: AtomicU64::new(1),
        };

        // Pre-create minimum connections
        pool.ensure_min_connections().await?;

        Ok(pool)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Get a connection from the pool
    pub async fn get_connection(&self) -> Result<PoolGuard> {
        let start = Instant::now();

        loop {
            if let Some(connection) = self.try_get_available()? {
                return Ok(self.guard(connection));
            }

            if let Some(connection) = self.try_create_connection().await? {
                return Ok(self.guard(connection));
            }

            if start.elapsed() > self.config.connect_timeout {
                return Err(LedgerError::PoolTimeout(format!(
                    "no connection available within {:?}",
                    self.config.connect_timeout
                )));
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn guard(&self, connection: Connection) -> PoolGuard {
        PoolGuard {
            connection: Some(connection),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Pop a live connection, discarding any that outlived their idle or lifetime limits
    fn try_get_available(&self) -> Result<Option<Connection>> {
        let mut available = self.shared.available.lock()?;

        while let Some(pooled) = available.pop_front() {
            if pooled.is_expired(self.config.max_lifetime)
                || pooled.is_idle_too_long(self.config.idle_timeout)
            {
                debug!(connection = pooled.connection.id(), "retiring stale pooled connection");
                self.shared.total_connections.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            return Ok(Some(pooled.connection));
        }

        Ok(None)
    }

    /// Try to create a new connection if under limit
    async fn try_create_connection(&self) -> Result<Option<Connection>> {
        let max = self.config.max_connections;
        let reserved = self
            .shared
            .total_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                (total < max).then_some(total + 1)
            })
            .is_ok();
        if !reserved {
            return Ok(None);
        }

        match self.open_connection().await {
            Ok(connection) => Ok(Some(connection)),
            Err(err) => {
                self.shared.total_connections.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn open_connection(&self) -> Result<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let config = self.config.clone();
        let connection = tokio::task::spawn_blocking(move || Connection::open(id, &config)).await??;
        debug!(connection = id, path = %self.config.path.display(), "opened connection");
        Ok(connection)
    }

    /// Ensure minimum number of connections
    async fn ensure_min_connections(&self) -> Result<()> {
        while self.shared.total_connections.load(Ordering::SeqCst) < self.config.min_connections {
            let connection = self.open_connection().await?;
            self.shared.total_connections.fetch_add(1, Ordering::SeqCst);
            self.shared
                .available
                .lock()?
                .push_back(PooledConnection::new(connection));
        }

        Ok(())
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let available = self.shared.available.lock().map(|a| a.len()).unwrap_or(0);
        let total = self.shared.total_connections.load(Ordering::SeqCst);

        PoolStats {
            total_connections: total,
            available_connections: available,
            active_connections: total.saturating_sub(available),
            max_connections: self.config.max_connections,
        }
    }
}

#[async_trait]
impl Executor for ConnectionPool {
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize> {
        let guard = self.get_connection().await?;
        guard.execute(sql, params).await
    }

    async fn query_row(&self, sql: &str, params: Vec<Value>) -> Result<Option<Row>> {
        let guard = self.get_connection().await?;
        guard.query_row(sql, params).await
    }

    async fn query_rows(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        let guard = self.get_connection().await?;
        guard.query_rows(sql, params).await
    }
}

/// Connection pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {}",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool when dropped. A connection that is still
/// inside a transaction (or still running a statement) is discarded instead;
/// closing it makes SQLite roll back whatever was left open.
pub struct PoolGuard {
    connection: Option<Connection>,
    shared: Arc<PoolShared>,
}

impl PoolGuard {
    /// Get a reference to the connection
    pub fn connection(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.connection
            .as_ref()
            .unwrap_or_else(|| unreachable!("pool guard used after release"))
    }
}

impl Deref for PoolGuard {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection()
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        if connection.try_in_transaction() != Some(false) {
            warn!(
                connection = connection.id(),
                "connection released with an open transaction; discarding it"
            );
            self.shared.total_connections.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        match self.shared.available.lock() {
            Ok(mut available) => available.push_back(PooledConnection::new(connection)),
            Err(_) => {
                self.shared.total_connections.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> LedgerConfig {
        LedgerConfig::new(dir.path().join("pool.db"))
    }

    #[tokio::test]
    async fn test_pool_creation() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir).min_connections(2).max_connections(5);

        let pool = ConnectionPool::new(config).await.unwrap();
        let stats = pool.stats();

        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.available_connections, 2);
    }

    #[tokio::test]
    async fn test_connection_return_to_pool() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::new(test_config(&dir).max_connections(5)).await.unwrap();

        {
            let _conn = pool.get_connection().await.unwrap();
            let stats = pool.stats();
            assert_eq!(stats.active_connections, 1);
            assert_eq!(stats.available_connections, 0);
        }

        let stats = pool.stats();
        assert_eq!(stats.available_connections, 1);
    }

    #[tokio::test]
    async fn test_max_connections_limit() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir)
            .max_connections(2)
            .connect_timeout(Duration::from_millis(100));

        let pool = ConnectionPool::new(config).await.unwrap();

        let _conn1 = pool.get_connection().await.unwrap();
        let _conn2 = pool.get_connection().await.unwrap();

        let result = pool.get_connection().await;
        assert!(matches!(result, Err(LedgerError::PoolTimeout(_))));
    }

    #[tokio::test]
    async fn test_guard_with_open_transaction_is_discarded() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::new(test_config(&dir).min_connections(0)).await.unwrap();

        {
            let conn = pool.get_connection().await.unwrap();
            conn.begin_immediate().await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.available_connections, 0);

        // The discarded connection released its write lock.
        let conn = pool.get_connection().await.unwrap();
        conn.begin_immediate().await.unwrap();
        conn.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_pool_rejects_invalid_config() {
        let result = ConnectionPool::new(LedgerConfig::new(":memory:")).await;
        assert!(matches!(result, Err(LedgerError::Config(_))));
    }
}
