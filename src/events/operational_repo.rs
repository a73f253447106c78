use chrono::{DateTime, Utc};
use tracing::debug;

use super::audit_repo::non_empty;
use super::record::{OperationalEventFilters, OperationalEventRecord};
use crate::core::{ActorRef, LedgerError, Result, Row, ScopeId, format_timestamp, parse_timestamp};
use crate::ident::{self, EntityId};
use crate::interface::Executor;
use crate::query::SelectBuilder;
use crate::retention::retention_cutoff;

const TABLE: &str = "operational_events";

const COLUMNS: &[&str] = &[
    "id",
    "scope_id",
    "timestamp",
    "actor_id",
    "source",
    "version",
    "level",
    "message",
    "data_json",
    "created_at",
];

/// Storage for operational events. Stateless, like
/// [`AuditEventRepository`](super::AuditEventRepository).
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationalEventRepository;

impl OperationalEventRepository {
    pub fn new() -> Self {
        Self
    }

    /// Insert `record`. An empty `data_json` is stored as NULL.
    pub async fn create(&self, exec: &dyn Executor, record: &OperationalEventRecord) -> Result<()> {
        exec.execute(
            "INSERT INTO operational_events (id, scope_id, timestamp, actor_id, source, version, \
             level, message, data_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            vec![
                record.id.as_str().into(),
                record.scope_id.as_ref().map(|s| s.as_str()).into(),
                format_timestamp(record.timestamp).into(),
                record.actor_id.as_ref().map(|a| a.as_str()).into(),
                record.source.as_str().into(),
                non_empty(&record.version),
                record.level.as_str().into(),
                record.message.as_str().into(),
                non_empty(&record.data_json),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn get(&self, exec: &dyn Executor, id: &str) -> Result<OperationalEventRecord> {
        let (sql, params) = SelectBuilder::new(TABLE, COLUMNS).eq("id", id).build();
        match exec.query_row(&sql, params).await? {
            Some(row) => decode(&row),
            None => Err(LedgerError::not_found("operational event", id)),
        }
    }

    /// Matching events, newest first.
    pub async fn list(
        &self,
        exec: &dyn Executor,
        filters: &OperationalEventFilters,
    ) -> Result<Vec<OperationalEventRecord>> {
        let (sql, params) = SelectBuilder::new(TABLE, COLUMNS)
            .eq_opt("scope_id", filters.scope_id.as_ref().map(|s| s.as_str()))
            .eq_opt("actor_id", filters.actor_id.as_ref().map(|a| a.as_str()))
            .eq_opt("source", filters.source.as_deref())
            .eq_opt("level", filters.level.map(|l| l.as_str()))
            .order_by_desc("timestamp")
            .order_by_desc("id")
            .limit(filters.limit)
            .build();

        exec.query_rows(&sql, params)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    pub async fn next_id(&self, exec: &dyn Executor) -> Result<EntityId> {
        ident::next_identifier(
            exec,
            ident::OPERATIONAL_EVENTS.table,
            ident::OPERATIONAL_EVENTS.prefix,
            ident::OPERATIONAL_EVENTS.width,
        )
        .await
    }

    /// Delete events older than `days` days. Returns the number removed.
    pub async fn prune_older_than(&self, exec: &dyn Executor, days: i64) -> Result<usize> {
        self.prune_before(exec, retention_cutoff(Utc::now(), days)?)
            .await
    }

    /// Delete events whose timestamp is strictly before `cutoff`.
    pub async fn prune_before(&self, exec: &dyn Executor, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = exec
            .execute(
                "DELETE FROM operational_events WHERE timestamp < ?1",
                vec![format_timestamp(cutoff).into()],
            )
            .await?;
        debug!(deleted, cutoff = %cutoff, "pruned operational events");
        Ok(deleted)
    }
}

fn decode(row: &Row) -> Result<OperationalEventRecord> {
    Ok(OperationalEventRecord {
        id: EntityId::new(row.get_str(0)?),
        scope_id: row.get_opt_str(1)?.map(ScopeId::new),
        timestamp: parse_timestamp(&row.get_str(2)?)?,
        actor_id: row.get_opt_str(3)?.map(ActorRef::new),
        source: row.get_str(4)?,
        version: row.get_opt_str(5)?.unwrap_or_default(),
        level: row.get_str(6)?.parse()?,
        message: row.get_str(7)?,
        data_json: row.get_opt_str(8)?.unwrap_or_default(),
        created_at: Some(parse_timestamp(&row.get_str(9)?)?),
    })
}
