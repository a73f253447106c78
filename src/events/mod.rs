// ============================================================================
// Audit and Operational Events
// ============================================================================
//
// - record: event shapes, actions, levels, filters
// - audit_repo / operational_repo: storage, listing, id generation, pruning
// - scope: actor -> owning scope resolution
// - feed: both tables merged into one newest-first stream
// - writer: builds events and writes them through the ambient transaction
//
// ============================================================================

pub mod audit_repo;
pub mod feed;
pub mod operational_repo;
pub mod record;
pub mod scope;
pub mod writer;

pub use audit_repo::AuditEventRepository;
pub use feed::{Event, EventFeed, EventFilters, EventKind};
pub use operational_repo::OperationalEventRepository;
pub use record::{
    AuditAction, AuditEventFilters, AuditEventRecord, FieldChange, Level, OperationalEventFilters,
    OperationalEventRecord, source,
};
pub use scope::{ScopeLookup, ScopeResolver, WorkbenchScopeLookup};
pub use writer::{AuditOutcome, EventWriter};
