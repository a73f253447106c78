// ============================================================================
// workledger Library
// ============================================================================
//
// Transactional coordination and audit trail over a single-writer SQLite file:
// sequential identifiers, ambient exclusive transactions, and audit and
// operational events that commit or roll back with the work they describe.
//
// ============================================================================

pub mod connection;
pub mod core;
pub mod events;
pub mod ident;
pub mod interface;
pub mod prelude;
pub mod query;
pub mod retention;
pub mod schema;
pub mod transaction;

use std::future::Future;
use std::sync::Arc;

use tracing::info;

// Re-export main types for convenience
pub use crate::core::{ActorRef, LedgerError, Result, Row, ScopeId, Value};
pub use ident::{EntityId, IdSequence, next_identifier};
pub use interface::Executor;

// Re-export connection API
pub use connection::{
    Connection,
    config::LedgerConfig,
    pool::{ConnectionPool, PoolGuard, PoolStats},
};

pub use events::{
    AuditAction, AuditEventFilters, AuditEventRecord, AuditEventRepository, AuditOutcome, Event,
    EventFeed, EventFilters, EventKind, EventWriter, FieldChange, Level, OperationalEventFilters,
    OperationalEventRecord, OperationalEventRepository, ScopeLookup, ScopeResolver,
    WorkbenchScopeLookup,
};
pub use retention::{PruneReport, Retention, RetentionSweeper};
pub use transaction::{NestedPolicy, TransactionHandle, Transactor, TxContext};

// ============================================================================
// High-level API
// ============================================================================

/// An opened ledger database.
///
/// Owns the connection pool and wires the transactor, the event writer and
/// retention onto it. Cheap to clone; clones share the pool.
///
/// # Examples
///
/// ```no_run
/// use workledger::{Executor, Ledger, LedgerConfig, TxContext, ident};
///
/// # async fn demo() -> workledger::Result<()> {
/// let ledger = Ledger::open(LedgerConfig::new("/var/lib/orc/ledger.db")).await?;
/// let ctx = TxContext::for_actor("IMP-BENCH-014");
///
/// let factory = ledger
///     .run_exclusive(&ctx, |tx| {
///         let ledger = ledger.clone();
///         async move {
///             let id = ident::FACTORIES.next(&tx, ledger.pool().as_ref()).await?;
///             tx.executor(ledger.pool().as_ref())
///                 .execute(
///                     "INSERT INTO factories (id, name) VALUES (?1, ?2)",
///                     vec![id.as_str().into(), "Main".into()],
///                 )
///                 .await?;
///             ledger.events().emit_audit_create(&tx, "factory", id.as_str()).await?;
///             Ok(id)
///         }
///     })
///     .await?;
/// println!("created {}", factory);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Ledger {
    pool: Arc<ConnectionPool>,
    transactor: Transactor,
    events: EventWriter,
    retention: Retention,
}

impl Ledger {
    /// Open (creating if needed) the database file and bring its schema up to date.
    pub async fn open(config: LedgerConfig) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::new(config).await?);

        let version = {
            let conn = pool.get_connection().await?;
            schema::migrate(&conn).await?
        };
        info!(
            path = %pool.config().path.display(),
            schema_version = version,
            "ledger opened"
        );

        Ok(Self {
            transactor: Transactor::new(Arc::clone(&pool)),
            events: EventWriter::new(Arc::clone(&pool)),
            retention: Retention::new(Arc::clone(&pool)),
            pool,
        })
    }

    /// Open using a connection string
    ///
    /// Format: `sqlite:///path/to/ledger.db?busy_timeout_ms=5000&max_connections=10`
    pub async fn open_url(url: &str) -> Result<Self> {
        Self::open(LedgerConfig::from_url(url)?).await
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn config(&self) -> &LedgerConfig {
        self.pool.config()
    }

    pub fn transactor(&self) -> &Transactor {
        &self.transactor
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn retention(&self) -> &Retention {
        &self.retention
    }

    /// See [`Transactor::run_exclusive`].
    pub async fn run_exclusive<T, F, Fut>(&self, ctx: &TxContext, unit_of_work: F) -> Result<T>
    where
        F: FnOnce(TxContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transactor.run_exclusive(ctx, unit_of_work).await
    }

    /// Audit and operational events merged newest first.
    pub async fn list_events(&self, filters: &EventFilters) -> Result<Vec<Event>> {
        EventFeed::new().list(self.pool.as_ref(), filters).await
    }

    /// A single event of either kind, by id.
    pub async fn get_event(&self, id: &str) -> Result<Event> {
        EventFeed::new().get(self.pool.as_ref(), id).await
    }

    /// The executor a unit of work should use: its open transaction, or the pool.
    pub fn executor<'a>(&'a self, ctx: &'a TxContext) -> &'a dyn Executor {
        ctx.executor(self.pool.as_ref())
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
