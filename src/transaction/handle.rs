use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::connection::pool::PoolGuard;
use crate::core::{LedgerError, Result, Row, Value};
use crate::interface::Executor;

/// One open `BEGIN IMMEDIATE` transaction on a dedicated pooled connection.
///
/// Clones share the same transaction. Only the coordinator finishes it; after
/// that every statement fails with [`LedgerError::TransactionFinished`] and the
/// connection is back in the pool.
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: Uuid,
    slot: Mutex<Option<PoolGuard>>,
}

impl TransactionHandle {
    /// Wrap a connection that has already executed `BEGIN IMMEDIATE`.
    pub(crate) fn new(guard: PoolGuard) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                slot: Mutex::new(Some(guard)),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &TransactionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn is_finished(&self) -> bool {
        self.inner.slot.lock().await.is_none()
    }

    /// Commit and release the connection. On failure the transaction stays
    /// open so the caller can roll it back.
    pub(crate) async fn commit(&self) -> Result<()> {
        let mut slot = self.inner.slot.lock().await;
        let guard = slot.as_ref().ok_or(LedgerError::TransactionFinished)?;
        guard.commit().await?;
        slot.take();
        Ok(())
    }

    /// Roll back and release the connection. The connection is released even
    /// when the rollback itself fails; the pool then discards it.
    pub(crate) async fn rollback(&self) -> Result<()> {
        let mut slot = self.inner.slot.lock().await;
        let guard = slot.take().ok_or(LedgerError::TransactionFinished)?;
        guard.rollback().await
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle").field("id", &self.inner.id).finish()
    }
}

#[async_trait]
impl Executor for TransactionHandle {
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize> {
        let slot = self.inner.slot.lock().await;
        let guard = slot.as_ref().ok_or(LedgerError::TransactionFinished)?;
        guard.execute(sql, params).await
    }

    async fn query_row(&self, sql: &str, params: Vec<Value>) -> Result<Option<Row>> {
        let slot = self.inner.slot.lock().await;
        let guard = slot.as_ref().ok_or(LedgerError::TransactionFinished)?;
        guard.query_row(sql, params).await
    }

    async fn query_rows(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        let slot = self.inner.slot.lock().await;
        let guard = slot.as_ref().ok_or(LedgerError::TransactionFinished)?;
        guard.query_rows(sql, params).await
    }
}
