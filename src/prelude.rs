//! Recommended imports grouped by abstraction level.
//!
//! `app` covers code that runs units of work and emits events.
//! `advanced` exposes the pieces underneath for callers wiring their own
//! repositories onto the same transactions.

pub mod app {
    //! Everyday surface: open a ledger, run exclusive units of work, emit events.
    pub use crate::{
        ActorRef, AuditOutcome, EntityId, Event, EventFilters, EventKind, FieldChange, Ledger,
        LedgerConfig, LedgerError, Level, NestedPolicy, Result, ScopeId, TxContext,
        events::source, ident,
    };
}

pub mod advanced {
    //! Building blocks for repositories that join the ambient transaction.
    pub use crate::interface::Executor;
    pub use crate::query::SelectBuilder;
    pub use crate::{
        AuditEventRepository, ConnectionPool, EventFeed, IdSequence, OperationalEventRepository,
        PoolGuard, Retention, ScopeLookup, ScopeResolver, TransactionHandle, Transactor,
        next_identifier,
    };
}
