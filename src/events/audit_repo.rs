use chrono::{DateTime, Utc};
use tracing::debug;

use super::record::{AuditEventFilters, AuditEventRecord};
use crate::core::{ActorRef, LedgerError, Result, Row, ScopeId, Value, format_timestamp, parse_timestamp};
use crate::ident::{self, EntityId};
use crate::interface::Executor;
use crate::query::SelectBuilder;
use crate::retention::retention_cutoff;

const TABLE: &str = "audit_events";

const COLUMNS: &[&str] = &[
    "id",
    "scope_id",
    "timestamp",
    "actor_id",
    "source",
    "version",
    "entity_type",
    "entity_id",
    "action",
    "field_name",
    "old_value",
    "new_value",
    "created_at",
];

/// Storage for audit events.
///
/// Stateless: every operation takes the executor to run on, which is how a
/// caller puts it inside or outside an open transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditEventRepository;

impl AuditEventRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn create(&self, exec: &dyn Executor, record: &AuditEventRecord) -> Result<()> {
        exec.execute(
            "INSERT INTO audit_events (id, scope_id, timestamp, actor_id, source, version, \
             entity_type, entity_id, action, field_name, old_value, new_value) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            vec![
                record.id.as_str().into(),
                record.scope_id.as_ref().map(|s| s.as_str()).into(),
                format_timestamp(record.timestamp).into(),
                record.actor_id.as_ref().map(|a| a.as_str()).into(),
                non_empty(&record.source),
                non_empty(&record.version),
                record.entity_type.as_str().into(),
                record.entity_id.as_str().into(),
                record.action.as_str().into(),
                record.field_name.as_deref().into(),
                record.old_value.as_deref().into(),
                record.new_value.as_deref().into(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn get(&self, exec: &dyn Executor, id: &str) -> Result<AuditEventRecord> {
        let (sql, params) = SelectBuilder::new(TABLE, COLUMNS).eq("id", id).build();
        match exec.query_row(&sql, params).await? {
            Some(row) => decode(&row),
            None => Err(LedgerError::not_found("audit event", id)),
        }
    }

    /// Matching events, newest first.
    pub async fn list(
        &self,
        exec: &dyn Executor,
        filters: &AuditEventFilters,
    ) -> Result<Vec<AuditEventRecord>> {
        let (sql, params) = SelectBuilder::new(TABLE, COLUMNS)
            .eq_opt("scope_id", filters.scope_id.as_ref().map(|s| s.as_str()))
            .eq_opt("entity_type", filters.entity_type.as_deref())
            .eq_opt("entity_id", filters.entity_id.as_deref())
            .eq_opt("actor_id", filters.actor_id.as_ref().map(|a| a.as_str()))
            .eq_opt("action", filters.action.map(|a| a.as_str()))
            .eq_opt("source", filters.source.as_deref())
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
            ident::AUDIT_EVENTS.table,
            ident::AUDIT_EVENTS.prefix,
            ident::AUDIT_EVENTS.width,
        )
        .await
    }

    /// Whether `scope_id` names an existing workshop.
    pub async fn scope_exists(&self, exec: &dyn Executor, scope_id: &ScopeId) -> Result<bool> {
        let row = exec
            .query_row(
                "SELECT COUNT(*) FROM workshops WHERE id = ?1",
                vec![scope_id.as_str().into()],
            )
            .await?;
        Ok(match row {
            Some(row) => row.get_i64(0)? > 0,
            None => false,
        })
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
                "DELETE FROM audit_events WHERE timestamp < ?1",
                vec![format_timestamp(cutoff).into()],
            )
            .await?;
        debug!(deleted, cutoff = %cutoff, "pruned audit events");
        Ok(deleted)
    }
}

pub(super) fn non_empty(s: &str) -> Value {
    if s.is_empty() { Value::Null } else { s.into() }
}

fn decode(row: &Row) -> Result<AuditEventRecord> {
    Ok(AuditEventRecord {
        id: EntityId::new(row.get_str(0)?),
        scope_id: row.get_opt_str(1)?.map(ScopeId::new),
        timestamp: parse_timestamp(&row.get_str(2)?)?,
        actor_id: row.get_opt_str(3)?.map(ActorRef::new),
        source: row.get_opt_str(4)?.unwrap_or_default(),
        version: row.get_opt_str(5)?.unwrap_or_default(),
        entity_type: row.get_str(6)?,
        entity_id: row.get_str(7)?,
        action: row.get_str(8)?.parse()?,
        field_name: row.get_opt_str(9)?,
        old_value: row.get_opt_str(10)?,
        new_value: row.get_opt_str(11)?,
        created_at: Some(parse_timestamp(&row.get_str(12)?)?),
    })
}
