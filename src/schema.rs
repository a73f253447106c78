//! Tables the ledger writes to, versioned through `PRAGMA user_version`.
//!
//! Only the organisational hierarchy needed for scope resolution and the two
//! event tables live here. Timestamps are fixed-width RFC 3339 text so that
//! lexical comparison matches chronological order.

use tracing::{info, warn};

use crate::connection::Connection;
use crate::core::{LedgerError, Result};
use crate::interface::Executor;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const TIMESTAMP_DEFAULT: &str = "(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))";

fn migration(version: i64) -> Option<String> {
    match version {
        1 => Some(format!(
            "
            CREATE TABLE factories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL DEFAULT {ts},
                updated_at TEXT NOT NULL DEFAULT {ts}
            );

            CREATE TABLE workshops (
                id TEXT PRIMARY KEY,
                factory_id TEXT NOT NULL REFERENCES factories(id),
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL DEFAULT {ts},
                updated_at TEXT NOT NULL DEFAULT {ts}
            );

            CREATE TABLE workbenches (
                id TEXT PRIMARY KEY,
                workshop_id TEXT REFERENCES workshops(id),
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL DEFAULT {ts},
                updated_at TEXT NOT NULL DEFAULT {ts}
            );

            CREATE TABLE audit_events (
                id TEXT PRIMARY KEY,
                scope_id TEXT REFERENCES workshops(id),
                timestamp TEXT NOT NULL DEFAULT {ts},
                actor_id TEXT,
                source TEXT,
                version TEXT,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL CHECK (action IN ('create', 'update', 'delete')),
                field_name TEXT,
                old_value TEXT,
                new_value TEXT,
                created_at TEXT NOT NULL DEFAULT {ts}
            );

            CREATE INDEX idx_audit_events_scope ON audit_events(scope_id);
            CREATE INDEX idx_audit_events_entity ON audit_events(entity_type, entity_id);
            CREATE INDEX idx_audit_events_timestamp ON audit_events(timestamp);

            CREATE TABLE operational_events (
                id TEXT PRIMARY KEY,
                scope_id TEXT,
                timestamp TEXT NOT NULL DEFAULT {ts},
                actor_id TEXT,
                source TEXT NOT NULL,
                version TEXT,
                level TEXT NOT NULL CHECK (level IN ('debug', 'info', 'warn', 'error')),
                message TEXT NOT NULL,
                data_json TEXT,
                created_at TEXT NOT NULL DEFAULT {ts}
            );

            CREATE INDEX idx_operational_events_source ON operational_events(source);
            CREATE INDEX idx_operational_events_level ON operational_events(level);
            CREATE INDEX idx_operational_events_timestamp ON operational_events(timestamp);
            ",
            ts = TIMESTAMP_DEFAULT
        )),
        _ => None,
    }
}

pub async fn schema_version(conn: &Connection) -> Result<i64> {
    match conn.query_row("PRAGMA user_version", vec![]).await? {
        Some(row) => row.get_i64(0),
        None => Ok(0),
    }
}

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`]. Each step runs in its
/// own immediate transaction, so concurrent openers apply it at most once.
pub async fn migrate(conn: &Connection) -> Result<i64> {
    loop {
        conn.begin_immediate().await?;
        let step = apply_next(conn).await;
        match step {
            Ok(Some(version)) => {
                conn.commit().await?;
                info!(version, "applied schema migration");
            }
            Ok(None) => {
                conn.rollback().await?;
                return schema_version(conn).await;
            }
            Err(err) => {
                if let Err(rollback_err) = conn.rollback().await {
                    warn!(error = %rollback_err, "rollback of failed migration failed");
                }
                return Err(err);
            }
        }
    }
}

async fn apply_next(conn: &Connection) -> Result<Option<i64>> {
    let current = schema_version(conn).await?;
    if current > CURRENT_SCHEMA_VERSION {
        return Err(LedgerError::Config(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_SCHEMA_VERSION
        )));
    }
    if current == CURRENT_SCHEMA_VERSION {
        return Ok(None);
    }

    let next = current + 1;
    let ddl = migration(next)
        .ok_or_else(|| LedgerError::Config(format!("no migration for schema version {}", next)))?;
    conn.execute_batch(&ddl).await?;
    conn.execute_batch(&format!("PRAGMA user_version = {}", next))
        .await?;
    Ok(Some(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::LedgerConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrate_fresh_and_again() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(1, &LedgerConfig::new(dir.path().join("schema.db"))).unwrap();

        assert_eq!(schema_version(&conn).await.unwrap(), 0);
        assert_eq!(migrate(&conn).await.unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(migrate(&conn).await.unwrap(), CURRENT_SCHEMA_VERSION);

        let row = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('factories', 'workshops', 'workbenches', 'audit_events', 'operational_events')",
                vec![],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_i64(0).unwrap(), 5);
        assert_eq!(conn.try_in_transaction(), Some(false));
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(1, &LedgerConfig::new(dir.path().join("future.db"))).unwrap();
        conn.execute_batch("PRAGMA user_version = 99").await.unwrap();

        let err = migrate(&conn).await.unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
        assert_eq!(conn.try_in_transaction(), Some(false));
    }

    #[tokio::test]
    async fn test_failed_step_rolls_back_completely() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(1, &LedgerConfig::new(dir.path().join("clash.db"))).unwrap();
        // An unversioned table that collides with the first migration.
        conn.execute_batch("CREATE TABLE workbenches (id TEXT PRIMARY KEY)")
            .await
            .unwrap();

        assert!(migrate(&conn).await.is_err());
        assert_eq!(conn.try_in_transaction(), Some(false));
        assert_eq!(schema_version(&conn).await.unwrap(), 0);

        let row = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'factories'",
                vec![],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_i64(0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timestamp_default_is_fixed_width() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(1, &LedgerConfig::new(dir.path().join("ts.db"))).unwrap();
        migrate(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO factories (id, name) VALUES (?1, ?2)",
            vec!["FACT-001".into(), "Main".into()],
        )
        .await
        .unwrap();
        let row = conn
            .query_row("SELECT created_at FROM factories", vec![])
            .await
            .unwrap()
            .unwrap();
        let created_at = row.get_str(0).unwrap();
        assert_eq!(created_at.len(), "2026-10-18T09:15:02.123Z".len());
        assert!(created_at.ends_with('Z'));
    }
}
