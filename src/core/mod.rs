pub mod error;
pub mod types;
pub mod value;

pub use error::{LedgerError, Result};
pub use types::{ActorRef, ScopeId, format_timestamp, parse_timestamp};
pub use value::{Row, Value};
