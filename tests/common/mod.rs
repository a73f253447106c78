//! Shared fixtures for the integration tests.
//!
//! Every test gets its own file-backed database inside a temp directory, with
//! the same pragmas production uses (WAL, busy timeout, foreign keys).

#![allow(dead_code)]

use std::time::Duration;

use tempfile::TempDir;
use workledger::{Executor, Ledger, LedgerConfig};

pub const TEST_VERSION: &str = "abc123";

pub struct TestLedger {
    pub ledger: Ledger,
    // Keeps the database directory alive for the duration of the test.
    _dir: TempDir,
}

impl std::ops::Deref for TestLedger {
    type Target = Ledger;

    fn deref(&self) -> &Ledger {
        &self.ledger
    }
}

pub fn test_config(dir: &TempDir) -> LedgerConfig {
    LedgerConfig::new(dir.path().join("ledger.db"))
        .event_version(TEST_VERSION)
        .connect_timeout(Duration::from_secs(30))
}

pub async fn open_ledger() -> TestLedger {
    open_ledger_with(|config| config).await
}

pub async fn open_ledger_with(configure: impl FnOnce(LedgerConfig) -> LedgerConfig) -> TestLedger {
    let dir = TempDir::new().unwrap();
    let ledger = Ledger::open(configure(test_config(&dir))).await.unwrap();
    TestLedger { ledger, _dir: dir }
}

/// FACT-001 / SHOP-001 / BENCH-014, plus an unassigned BENCH-020.
pub async fn seed_hierarchy(ledger: &Ledger) {
    let pool = ledger.pool().as_ref();
    pool.execute(
        "INSERT INTO factories (id, name) VALUES ('FACT-001', 'Main Factory')",
        vec![],
    )
    .await
    .unwrap();
    pool.execute(
        "INSERT INTO workshops (id, factory_id, name) VALUES ('SHOP-001', 'FACT-001', 'Assembly')",
        vec![],
    )
    .await
    .unwrap();
    pool.execute(
        "INSERT INTO workbenches (id, workshop_id, name) VALUES ('BENCH-014', 'SHOP-001', 'Bench 14')",
        vec![],
    )
    .await
    .unwrap();
    pool.execute(
        "INSERT INTO workbenches (id, workshop_id, name) VALUES ('BENCH-020', NULL, 'Spare bench')",
        vec![],
    )
    .await
    .unwrap();
}

/// Scratch entity table for identifier tests.
pub async fn create_items_table(ledger: &Ledger) {
    ledger
        .pool()
        .execute(
            "CREATE TABLE items (id TEXT PRIMARY KEY, caller INTEGER NOT NULL)",
            vec![],
        )
        .await
        .unwrap();
}

pub async fn count(exec: &dyn Executor, table: &str) -> i64 {
    exec.query_row(&format!("SELECT COUNT(*) FROM {}", table), vec![])
        .await
        .unwrap()
        .unwrap()
        .get_i64(0)
        .unwrap()
}
