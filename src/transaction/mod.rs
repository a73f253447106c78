// ============================================================================
// Transaction Coordination
// ============================================================================
//
// Exclusive write transactions over a single-writer SQLite file.
//
// - TxContext: explicit, immutable carrier of the ambient transaction
// - TransactionHandle: one BEGIN IMMEDIATE transaction on a dedicated connection
// - Transactor: opens, publishes, commits or rolls back
//
// ============================================================================

pub mod context;
pub mod coordinator;
pub mod handle;

pub use context::TxContext;
pub use coordinator::{NestedPolicy, Transactor};
pub use handle::TransactionHandle;
