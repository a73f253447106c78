use crate::core::ActorRef;
use crate::interface::Executor;

use super::TransactionHandle;

/// Carrier for the ambient transaction and acting identity of a unit of work.
///
/// Immutable: every `with_*` call returns a derived value and leaves the
/// original untouched. It is passed down the call chain explicitly; nothing is
/// stored in thread-locals or globals, so independent units of work never see
/// each other's transaction.
#[derive(Clone, Debug, Default)]
pub struct TxContext {
    tx: Option<TransactionHandle>,
    actor: Option<ActorRef>,
}

impl TxContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `TxContext::new().with_actor(actor)`.
    pub fn for_actor(actor: impl Into<ActorRef>) -> Self {
        Self::new().with_actor(actor)
    }

    pub fn with_transaction(&self, handle: TransactionHandle) -> Self {
        Self {
            tx: Some(handle),
            actor: self.actor.clone(),
        }
    }

    pub fn with_actor(&self, actor: impl Into<ActorRef>) -> Self {
        Self {
            tx: self.tx.clone(),
            actor: Some(actor.into()),
        }
    }

    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.tx.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn actor(&self) -> Option<&ActorRef> {
        self.actor.as_ref()
    }

    /// The ambient transaction if one is open, otherwise `default`.
    pub fn executor<'a>(&'a self, default: &'a dyn Executor) -> &'a dyn Executor {
        match &self.tx {
            Some(handle) => handle as &dyn Executor,
            None => default,
        }
    }
}
