use std::future::Future;
use std::sync::Arc;

use tracing::{Instrument, debug, info_span, warn};

use super::{TransactionHandle, TxContext};
use crate::connection::pool::ConnectionPool;
use crate::core::{LedgerError, Result};

/// What `run_exclusive` does when handed a context that already carries a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestedPolicy {
    /// Run the inner unit of work on the ambient transaction. The outermost
    /// call alone commits or rolls back.
    #[default]
    Join,
    /// Fail fast with [`LedgerError::AlreadyInTransaction`].
    Reject,
}

/// Runs units of work inside exclusive write transactions.
///
/// The write lock is taken at `BEGIN IMMEDIATE`, so a second writer waits at
/// begin time (up to the connection's busy timeout) instead of failing halfway
/// through. Writes of two units of work are therefore never interleaved.
#[derive(Clone)]
pub struct Transactor {
    pool: Arc<ConnectionPool>,
    nested: NestedPolicy,
}

impl Transactor {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        let nested = pool.config().nested;
        Self { pool, nested }
    }

    pub fn with_nested_policy(mut self, policy: NestedPolicy) -> Self {
        self.nested = policy;
        self
    }

    pub fn nested_policy(&self) -> NestedPolicy {
        self.nested
    }

    /// Execute `unit_of_work` atomically.
    ///
    /// The derived context handed to `unit_of_work` carries the transaction;
    /// anything resolving its executor through it writes on the same
    /// transaction. `Ok` commits, `Err` rolls back and returns the original
    /// error. Lock-wait expiry surfaces as [`LedgerError::Busy`] and is not
    /// retried here.
    pub async fn run_exclusive<T, F, Fut>(&self, ctx: &TxContext, unit_of_work: F) -> Result<T>
    where
        F: FnOnce(TxContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(ambient) = ctx.transaction() {
            return match self.nested {
                NestedPolicy::Join => {
                    debug!(tx = %ambient.id(), "joining ambient transaction");
                    unit_of_work(ctx.clone()).await
                }
                NestedPolicy::Reject => Err(LedgerError::AlreadyInTransaction),
            };
        }

        let guard = self.pool.get_connection().await?;
        guard.begin_immediate().await?;

        let handle = TransactionHandle::new(guard);
        let span = info_span!("exclusive_tx", tx = %handle.id());
        let tx_ctx = ctx.with_transaction(handle.clone());

        async move {
            debug!("transaction opened");
            match unit_of_work(tx_ctx).await {
                Ok(value) => match handle.commit().await {
                    Ok(()) => {
                        debug!("transaction committed");
                        Ok(value)
                    }
                    Err(commit_err) => {
                        warn!(error = %commit_err, "commit failed; rolling back");
                        if let Err(rollback_err) = handle.rollback().await {
                            warn!(error = %rollback_err, "rollback after failed commit also failed");
                        }
                        Err(commit_err)
                    }
                },
                Err(err) => {
                    debug!(error = %err, "unit of work failed; rolling back");
                    if let Err(rollback_err) = handle.rollback().await {
                        warn!(error = %rollback_err, "rollback failed");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}
