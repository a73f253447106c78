//! Age-based pruning of the event tables.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::connection::pool::ConnectionPool;
use crate::core::{LedgerError, Result};
use crate::events::{AuditEventRepository, OperationalEventRepository};

/// Rows removed by one prune, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub audit: usize,
    pub operational: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.audit + self.operational
    }
}

impl fmt::Display for PruneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pruned {} audit and {} operational events",
            self.audit, self.operational
        )
    }
}

/// `now - days`. Negative ages are rejected.
pub(crate) fn retention_cutoff(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if days < 0 {
        return Err(LedgerError::InvalidArgument(format!(
            "retention days must be >= 0, got {}",
            days
        )));
    }
    TimeDelta::try_days(days)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| {
            LedgerError::InvalidArgument(format!("retention of {} days is out of range", days))
        })
}

#[derive(Clone)]
pub struct Retention {
    pool: Arc<ConnectionPool>,
    audit: AuditEventRepository,
    operational: OperationalEventRepository,
}

impl Retention {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            audit: AuditEventRepository::new(),
            operational: OperationalEventRepository::new(),
        }
    }

    /// Delete events older than `days` days from both tables.
    ///
    /// The tables are pruned independently, each in its own statement; a
    /// second call with the same threshold removes nothing new.
    pub async fn prune(&self, days: i64) -> Result<PruneReport> {
        let cutoff = retention_cutoff(Utc::now(), days)?;
        let report = PruneReport {
            audit: self.audit.prune_before(self.pool.as_ref(), cutoff).await?,
            operational: self
                .operational
                .prune_before(self.pool.as_ref(), cutoff)
                .await?,
        };
        info!(days, audit = report.audit, operational = report.operational, "retention prune");
        Ok(report)
    }

    /// Prune every `interval` until the returned sweeper is stopped or dropped.
    pub fn spawn_sweeper(&self, interval: Duration, days: i64) -> Result<RetentionSweeper> {
        retention_cutoff(Utc::now(), days)?;
        if interval.is_zero() {
            return Err(LedgerError::InvalidArgument(
                "sweeper interval must be positive".to_string(),
            ));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let retention = self.clone();

        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(interval) => {
                        if let Err(err) = retention.prune(days).await {
                            warn!(error = %err, "retention sweep failed");
                        }
                    }
                }
            }
        });

        Ok(RetentionSweeper {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        })
    }
}

/// Background retention task.
pub struct RetentionSweeper {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl RetentionSweeper {
    /// Signals the sweeper to stop and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.await?;
        }
        Ok(())
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{format_timestamp, parse_timestamp};

    #[test]
    fn test_retention_cutoff() {
        let now = parse_timestamp("2026-10-18T12:00:00.000Z").unwrap();
        assert_eq!(retention_cutoff(now, 0).unwrap(), now);
        assert_eq!(
            format_timestamp(retention_cutoff(now, 30).unwrap()),
            "2026-09-18T12:00:00.000Z"
        );
        assert!(matches!(
            retention_cutoff(now, -1),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(retention_cutoff(now, i64::MAX).is_err());
    }

    #[test]
    fn test_report_display() {
        let report = PruneReport {
            audit: 2,
            operational: 5,
        };
        assert_eq!(report.total(), 7);
        assert_eq!(report.to_string(), "pruned 2 audit and 5 operational events");
    }
}
