use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace, warn};

use super::audit_repo::AuditEventRepository;
use super::operational_repo::OperationalEventRepository;
use super::record::{
    AuditAction, AuditEventRecord, FieldChange, Level, OperationalEventRecord, encode_data, source,
};
use super::scope::ScopeResolver;
use crate::connection::Connection;
use crate::connection::pool::{ConnectionPool, PoolGuard};
use crate::core::{ActorRef, Result};
use crate::ident::EntityId;
use crate::interface::Executor;
use crate::transaction::TxContext;

/// Result of an audit emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    /// The actor resolved to no scope; nothing was written.
    Skipped,
    Recorded(EntityId),
}

impl AuditOutcome {
    pub fn id(&self) -> Option<&EntityId> {
        match self {
            AuditOutcome::Skipped => None,
            AuditOutcome::Recorded(id) => Some(id),
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, AuditOutcome::Recorded(_))
    }
}

/// Builds and persists audit and operational events.
///
/// With an open transaction in the context every write goes through it, so
/// the event commits or rolls back with the mutation it describes. Without
/// one, the event is written in a short exclusive transaction of its own so
/// concurrent standalone emits never draw the same id.
#[derive(Clone)]
pub struct EventWriter {
    pool: Arc<ConnectionPool>,
    audit: AuditEventRepository,
    operational: OperationalEventRepository,
    scopes: ScopeResolver,
    version: String,
}

impl EventWriter {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        let version = pool.config().event_version.clone();
        Self {
            pool,
            audit: AuditEventRepository::new(),
            operational: OperationalEventRepository::new(),
            scopes: ScopeResolver::default(),
            version,
        }
    }

    pub fn with_scope_resolver(mut self, scopes: ScopeResolver) -> Self {
        self.scopes = scopes;
        self
    }

    /// Override the version tag stamped on every event.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn emit_audit_create(
        &self,
        ctx: &TxContext,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<AuditOutcome> {
        self.write_audit(ctx, entity_type, entity_id, AuditAction::Create, None)
            .await
    }

    pub async fn emit_audit_update(
        &self,
        ctx: &TxContext,
        entity_type: &str,
        entity_id: &str,
        change: FieldChange,
    ) -> Result<AuditOutcome> {
        self.write_audit(ctx, entity_type, entity_id, AuditAction::Update, Some(change))
            .await
    }

    pub async fn emit_audit_delete(
        &self,
        ctx: &TxContext,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<AuditOutcome> {
        self.write_audit(ctx, entity_type, entity_id, AuditAction::Delete, None)
            .await
    }

    /// Persist an operational event whether or not a scope resolves.
    pub async fn emit_operational(
        &self,
        ctx: &TxContext,
        source: &str,
        level: Level,
        message: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<EntityId> {
        let data_json = encode_data(data)?;

        match ctx.transaction() {
            Some(tx) => {
                self.record_operational(tx, ctx.actor(), source, level, message, data_json)
                    .await
            }
            None => {
                let conn = self.begin_standalone().await?;
                let result = self
                    .record_operational(&*conn, ctx.actor(), source, level, message, data_json)
                    .await;
                finish_standalone(&conn, result).await
            }
        }
    }

    async fn write_audit(
        &self,
        ctx: &TxContext,
        entity_type: &str,
        entity_id: &str,
        action: AuditAction,
        change: Option<FieldChange>,
    ) -> Result<AuditOutcome> {
        let change = change.unwrap_or_default();

        match ctx.transaction() {
            Some(tx) => {
                self.record_audit(tx, ctx.actor(), entity_type, entity_id, action, change)
                    .await
            }
            None => {
                let conn = self.begin_standalone().await?;
                let result = self
                    .record_audit(&*conn, ctx.actor(), entity_type, entity_id, action, change)
                    .await;
                finish_standalone(&conn, result).await
            }
        }
    }

    /// Without an ambient transaction the scope lookup, the id scan and the
    /// insert still run under the write lock, on one pooled connection.
    async fn begin_standalone(&self) -> Result<PoolGuard> {
        let conn = self.pool.get_connection().await?;
        conn.begin_immediate().await?;
        trace!(connection = conn.id(), "standalone event write");
        Ok(conn)
    }

    async fn record_operational(
        &self,
        exec: &dyn Executor,
        actor: Option<&ActorRef>,
        source: &str,
        level: Level,
        message: &str,
        data_json: String,
    ) -> Result<EntityId> {
        let scope_id = self.scopes.resolve(exec, actor).await;

        let id = self.operational.next_id(exec).await?;
        let record = OperationalEventRecord {
            id: id.clone(),
            scope_id,
            timestamp: Utc::now(),
            actor_id: actor.cloned(),
            source: source.to_string(),
            version: self.version.clone(),
            level,
            message: message.to_string(),
            data_json,
            created_at: None,
        };
        self.operational.create(exec, &record).await?;

        trace!(id = %id, source, level = %level, "operational event recorded");
        Ok(id)
    }

    async fn record_audit(
        &self,
        exec: &dyn Executor,
        actor: Option<&ActorRef>,
        entity_type: &str,
        entity_id: &str,
        action: AuditAction,
        change: FieldChange,
    ) -> Result<AuditOutcome> {
        let Some(scope_id) = self.scopes.resolve(exec, actor).await else {
            debug!(entity_type, entity_id, action = %action, "no scope for actor; audit skipped");
            return Ok(AuditOutcome::Skipped);
        };

        let id = self.audit.next_id(exec).await?;
        let record = AuditEventRecord {
            id: id.clone(),
            scope_id: Some(scope_id),
            timestamp: Utc::now(),
            actor_id: actor.cloned(),
            source: source::LEDGER.to_string(),
            version: self.version.clone(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action,
            field_name: Some(change.field_name).filter(|f| !f.is_empty()),
            old_value: change.old_value,
            new_value: change.new_value,
            created_at: None,
        };
        self.audit.create(exec, &record).await?;

        trace!(id = %id, entity_type, entity_id, action = %action, "audit event recorded");
        Ok(AuditOutcome::Recorded(id))
    }
}

/// Commit on success, roll back on failure. A failed commit is rolled back
/// too and its error returned.
async fn finish_standalone<T>(conn: &Connection, result: Result<T>) -> Result<T> {
    let err = match result {
        Ok(value) => match conn.commit().await {
            Ok(()) => return Ok(value),
            Err(err) => err,
        },
        Err(err) => err,
    };

    if let Err(rollback_err) = conn.rollback().await {
        warn!(connection = conn.id(), error = %rollback_err, "standalone event rollback failed");
    }
    Err(err)
}
