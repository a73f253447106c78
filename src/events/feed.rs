//! One newest-first view over both event tables.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audit_repo::AuditEventRepository;
use super::operational_repo::OperationalEventRepository;
use super::record::{
    AuditEventFilters, AuditEventRecord, Level, OperationalEventFilters, OperationalEventRecord,
};
use crate::core::{ActorRef, LedgerError, Result, ScopeId};
use crate::ident::{self, EntityId};
use crate::interface::Executor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[default]
    All,
    Audit,
    Ops,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::All => "all",
            EventKind::Audit => "audit",
            EventKind::Ops => "ops",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "all" => Ok(EventKind::All),
            "audit" => Ok(EventKind::Audit),
            "ops" => Ok(EventKind::Ops),
            other => Err(LedgerError::InvalidArgument(format!(
                "unknown event kind '{}'",
                other
            ))),
        }
    }
}

/// Filters for the merged feed.
///
/// `entity_id` only exists on audit events and `level` only on operational
/// events; setting either narrows the feed to the kind that carries it.
/// `limit` caps the merged result, not each table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilters {
    pub kind: EventKind,
    pub scope_id: Option<ScopeId>,
    pub actor_id: Option<ActorRef>,
    pub entity_id: Option<String>,
    pub source: Option<String>,
    pub level: Option<Level>,
    pub limit: Option<usize>,
}

impl EventFilters {
    fn wants_audit(&self) -> bool {
        matches!(self.kind, EventKind::All | EventKind::Audit) && self.level.is_none()
    }

    fn wants_ops(&self) -> bool {
        matches!(self.kind, EventKind::All | EventKind::Ops) && self.entity_id.is_none()
    }
}

/// An event from either table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    Audit(AuditEventRecord),
    #[serde(rename = "ops")]
    Operational(OperationalEventRecord),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Audit(_) => EventKind::Audit,
            Event::Operational(_) => EventKind::Ops,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Event::Audit(record) => &record.id,
            Event::Operational(record) => &record.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Audit(record) => record.timestamp,
            Event::Operational(record) => record.timestamp,
        }
    }

    pub fn scope_id(&self) -> Option<&ScopeId> {
        match self {
            Event::Audit(record) => record.scope_id.as_ref(),
            Event::Operational(record) => record.scope_id.as_ref(),
        }
    }

    pub fn actor_id(&self) -> Option<&ActorRef> {
        match self {
            Event::Audit(record) => record.actor_id.as_ref(),
            Event::Operational(record) => record.actor_id.as_ref(),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Event::Audit(record) => &record.source,
            Event::Operational(record) => &record.source,
        }
    }
}

/// Reads audit and operational events as one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFeed {
    audit: AuditEventRepository,
    operational: OperationalEventRepository,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events from the selected tables merged newest first, then cut to
    /// `filters.limit`.
    pub async fn list(&self, exec: &dyn Executor, filters: &EventFilters) -> Result<Vec<Event>> {
        let mut events = Vec::new();

        if filters.wants_audit() {
            let audit_filters = AuditEventFilters {
                scope_id: filters.scope_id.clone(),
                entity_id: filters.entity_id.clone(),
                actor_id: filters.actor_id.clone(),
                source: filters.source.clone(),
                limit: filters.limit,
                ..Default::default()
            };
            let records = self.audit.list(exec, &audit_filters).await?;
            events.extend(records.into_iter().map(Event::Audit));
        }

        if filters.wants_ops() {
            let ops_filters = OperationalEventFilters {
                scope_id: filters.scope_id.clone(),
                actor_id: filters.actor_id.clone(),
                source: filters.source.clone(),
                level: filters.level,
                limit: filters.limit,
            };
            let records = self.operational.list(exec, &ops_filters).await?;
            events.extend(records.into_iter().map(Event::Operational));
        }

        events.sort_by(|a, b| {
            b.timestamp()
                .cmp(&a.timestamp())
                .then_with(|| b.id().cmp(a.id()))
        });
        if let Some(limit) = filters.limit {
            events.truncate(limit);
        }

        Ok(events)
    }

    /// Look an event up by id; the prefix picks the table.
    pub async fn get(&self, exec: &dyn Executor, id: &str) -> Result<Event> {
        if id.starts_with(ident::AUDIT_EVENTS.prefix) {
            return self.audit.get(exec, id).await.map(Event::Audit);
        }
        if id.starts_with(ident::OPERATIONAL_EVENTS.prefix) {
            return self.operational.get(exec, id).await.map(Event::Operational);
        }
        Err(LedgerError::not_found("event", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parse() {
        assert_eq!("all".parse::<EventKind>().unwrap(), EventKind::All);
        assert_eq!("".parse::<EventKind>().unwrap(), EventKind::All);
        assert_eq!("audit".parse::<EventKind>().unwrap(), EventKind::Audit);
        assert_eq!("ops".parse::<EventKind>().unwrap(), EventKind::Ops);
        assert!(matches!(
            "metrics".parse::<EventKind>(),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_single_kind_filters_narrow_the_feed() {
        let all = EventFilters::default();
        assert!(all.wants_audit() && all.wants_ops());

        let by_level = EventFilters {
            level: Some(Level::Error),
            ..Default::default()
        };
        assert!(!by_level.wants_audit());
        assert!(by_level.wants_ops());

        let by_entity = EventFilters {
            entity_id: Some("TASK-001".into()),
            ..Default::default()
        };
        assert!(by_entity.wants_audit());
        assert!(!by_entity.wants_ops());

        let audit_only = EventFilters {
            kind: EventKind::Audit,
            ..Default::default()
        };
        assert!(!audit_only.wants_ops());
    }
}
