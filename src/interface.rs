use async_trait::async_trait;

use crate::core::{Result, Row, Value};

/// Row-level statement execution.
///
/// The shared pool, a single connection and an open transaction handle all
/// implement this identically, so repositories never care which one they were
/// handed. Resolve the right one for a unit of work with
/// [`TxContext::executor`](crate::transaction::TxContext::executor).
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a statement that does not return rows. Returns the affected row count.
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize>;

    /// Run a query and return its first row, if any.
    async fn query_row(&self, sql: &str, params: Vec<Value>) -> Result<Option<Row>>;

    /// Run a query and return every row.
    async fn query_rows(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>>;
}
