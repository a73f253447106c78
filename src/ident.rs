//! Sequential, human-readable entity identifiers (`PREFIX-0007`).
//!
//! The next identifier is derived from the highest sequence already stored in
//! the entity's table. There is no locking here: generation is only race-free
//! when the scan and the insert that uses its result run inside the same
//! exclusive unit of work (see [`Transactor::run_exclusive`]). The table's
//! primary key remains the backstop when a caller gets that wrong.
//!
//! [`Transactor::run_exclusive`]: crate::transaction::Transactor::run_exclusive

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{LedgerError, Result};
use crate::interface::Executor;
use crate::transaction::TxContext;

/// A generated identifier such as `WE-0042`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an id read back from storage or supplied by a caller.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Numeric part after `prefix`, if the id carries that prefix.
    pub fn sequence(&self, prefix: &str) -> Option<u64> {
        self.0.strip_prefix(prefix)?.parse().ok()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Per-entity identifier constants: the table that owns the ids, the fixed
/// prefix and the zero-pad width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSequence {
    pub table: &'static str,
    pub prefix: &'static str,
    pub width: usize,
}

impl IdSequence {
    pub const fn new(table: &'static str, prefix: &'static str, width: usize) -> Self {
        Self {
            table,
            prefix,
            width,
        }
    }

    /// Next identifier, read through the ambient transaction when `ctx`
    /// carries one and through `default` otherwise.
    pub async fn next(&self, ctx: &TxContext, default: &dyn Executor) -> Result<EntityId> {
        if !ctx.in_transaction() {
            warn!(
                table = self.table,
                "identifier generated outside an exclusive transaction; concurrent writers may collide"
            );
        }
        next_identifier(ctx.executor(default), self.table, self.prefix, self.width).await
    }

    /// The identifier the next insert would receive right now. Informational
    /// only: without the write lock another writer may take it first.
    pub async fn peek(&self, exec: &dyn Executor) -> Result<EntityId> {
        next_identifier(exec, self.table, self.prefix, self.width).await
    }

    pub fn format(&self, sequence: u64) -> EntityId {
        format_identifier(self.prefix, sequence, self.width)
    }
}

pub const FACTORIES: IdSequence = IdSequence::new("factories", "FACT-", 3);
pub const WORKSHOPS: IdSequence = IdSequence::new("workshops", "SHOP-", 3);
pub const WORKBENCHES: IdSequence = IdSequence::new("workbenches", "BENCH-", 3);
pub const AUDIT_EVENTS: IdSequence = IdSequence::new("audit_events", "WE-", 4);
pub const OPERATIONAL_EVENTS: IdSequence = IdSequence::new("operational_events", "OE-", 4);

/// Every sequence backed by a table in the ledger schema.
pub const SEQUENCES: &[IdSequence] = &[
    FACTORIES,
    WORKSHOPS,
    WORKBENCHES,
    AUDIT_EVENTS,
    OPERATIONAL_EVENTS,
];

/// Zero-pad `sequence` to `width` digits. Wider values print in full: the
/// width is a minimum, so `999 -> 1000` never wraps.
pub fn format_identifier(prefix: &str, sequence: u64, width: usize) -> EntityId {
    EntityId(format!("{}{:0width$}", prefix, sequence, width = width))
}

/// Compute the identifier that follows the highest one stored in `table`.
///
/// Rows whose id does not start with `prefix` are ignored. An empty table
/// yields sequence 1.
pub async fn next_identifier(
    exec: &dyn Executor,
    table: &str,
    prefix: &str,
    width: usize,
) -> Result<EntityId> {
    validate_table_name(table)?;
    validate_prefix(prefix)?;

    let prefix_len = prefix.len() as i64;
    let sql = format!(
        "SELECT COALESCE(MAX(CAST(SUBSTR(id, ?1) AS INTEGER)), 0) FROM {} WHERE SUBSTR(id, 1, ?2) = ?3",
        table
    );
    let current = match exec
        .query_row(&sql, vec![(prefix_len + 1).into(), prefix_len.into(), prefix.into()])
        .await?
    {
        Some(row) => row.get_i64(0)?,
        None => 0,
    };

    let next = u64::try_from(current)
        .map_err(|_| LedgerError::InvalidArgument(format!("negative sequence in {}", table)))?
        + 1;
    Ok(format_identifier(prefix, next, width))
}

/// Table names are spliced into SQL text, so only plain identifiers pass.
fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(LedgerError::InvalidArgument(format!("invalid table name '{}'", table)))
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    let valid = prefix.ends_with('-')
        && prefix.len() > 1
        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(LedgerError::InvalidArgument(format!("invalid identifier prefix '{}'", prefix)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pads_to_width() {
        assert_eq!(format_identifier("X-", 7, 3).as_str(), "X-007");
        assert_eq!(format_identifier("WE-", 42, 4).as_str(), "WE-0042");
    }

    #[test]
    fn test_format_widens_instead_of_wrapping() {
        assert_eq!(format_identifier("X-", 999, 3).as_str(), "X-999");
        assert_eq!(format_identifier("X-", 1000, 3).as_str(), "X-1000");
        assert_eq!(format_identifier("OE-", 10000, 4).as_str(), "OE-10000");
    }

    #[test]
    fn test_sequence_parses_suffix() {
        let id = AUDIT_EVENTS.format(12);
        assert_eq!(id.as_str(), "WE-0012");
        assert_eq!(id.sequence("WE-"), Some(12));
        assert_eq!(id.sequence("OE-"), None);
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("audit_events").is_ok());
        assert!(validate_table_name("_scratch2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2fast").is_err());
        assert!(validate_table_name("events; DROP TABLE x").is_err());
    }

    #[test]
    fn test_known_sequences_are_valid_and_distinct() {
        let mut prefixes = std::collections::HashSet::new();
        for seq in SEQUENCES {
            assert!(validate_table_name(seq.table).is_ok(), "{}", seq.table);
            assert!(validate_prefix(seq.prefix).is_ok(), "{}", seq.prefix);
            assert!(prefixes.insert(seq.prefix), "duplicate prefix {}", seq.prefix);
        }
    }

    #[test]
    fn test_prefix_validation() {
        assert!(validate_prefix("CWO-").is_ok());
        assert!(validate_prefix("X-").is_ok());
        assert!(validate_prefix("-").is_err());
        assert!(validate_prefix("we-").is_err());
        assert!(validate_prefix("WE").is_err());
    }
}
