use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::core::{ActorRef, Result, ScopeId};
use crate::interface::Executor;

lazy_static! {
    /// `BENCH-<digits>` as a whole dash-separated token pair, e.g. the middle
    /// of `IMP-BENCH-014`.
    static ref WORKBENCH_MARKER: Regex = Regex::new(r"(?:^|-)(BENCH-[0-9]+)(?:-|$)").unwrap();
}

/// Extract the workbench id embedded in an actor reference.
pub fn workbench_marker(actor: &ActorRef) -> Option<&str> {
    WORKBENCH_MARKER
        .captures(actor.as_str())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Finds the scope that owns a workbench.
#[async_trait]
pub trait ScopeLookup: Send + Sync {
    /// `Ok(None)` when the workbench is unknown or belongs to no scope.
    async fn owning_scope(&self, exec: &dyn Executor, workbench_id: &str) -> Result<Option<ScopeId>>;
}

/// Reads `workbenches.workshop_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkbenchScopeLookup;

#[async_trait]
impl ScopeLookup for WorkbenchScopeLookup {
    async fn owning_scope(&self, exec: &dyn Executor, workbench_id: &str) -> Result<Option<ScopeId>> {
        let row = exec
            .query_row(
                "SELECT workshop_id FROM workbenches WHERE id = ?1",
                vec![workbench_id.into()],
            )
            .await?;
        Ok(match row {
            Some(row) => row
                .get_opt_str(0)?
                .filter(|workshop| !workshop.is_empty())
                .map(ScopeId::new),
            None => None,
        })
    }
}

/// Best-effort mapping from actor to scope. Never fails: anything that
/// prevents a match resolves to `None`.
#[derive(Clone)]
pub struct ScopeResolver {
    lookup: Arc<dyn ScopeLookup>,
}

impl Default for ScopeResolver {
    fn default() -> Self {
        Self::new(Arc::new(WorkbenchScopeLookup))
    }
}

impl ScopeResolver {
    pub fn new(lookup: Arc<dyn ScopeLookup>) -> Self {
        Self { lookup }
    }

    /// Read-only. `exec` should be the executor of the caller's unit of work
    /// so the lookup sees its uncommitted rows and shares its connection.
    pub async fn resolve(&self, exec: &dyn Executor, actor: Option<&ActorRef>) -> Option<ScopeId> {
        let actor = actor?;
        let Some(workbench_id) = workbench_marker(actor) else {
            debug!(actor = %actor, "actor carries no workbench marker");
            return None;
        };

        match self.lookup.owning_scope(exec, workbench_id).await {
            Ok(Some(scope)) => Some(scope),
            Ok(None) => {
                debug!(actor = %actor, workbench = workbench_id, "workbench has no owning scope");
                None
            }
            Err(err) => {
                debug!(actor = %actor, workbench = workbench_id, error = %err, "scope lookup failed");
                None
            }
        }
    }
}
