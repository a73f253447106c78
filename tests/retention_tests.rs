/// Retention tests
///
/// Age-based pruning of audit and operational events, one-shot and from the
/// background sweeper.
/// Run with: cargo test --test retention_tests

mod common;

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use common::{count, open_ledger, seed_hierarchy};
use workledger::{
    AuditAction, AuditEventRecord, AuditEventRepository, EntityId, Executor, LedgerError, Level,
    OperationalEventRecord, OperationalEventRepository, PruneReport, ScopeId,
};

async fn insert_aged(exec: &dyn Executor, seq: u64, age: TimeDelta) {
    let timestamp = Utc::now() - age;

    AuditEventRepository::new()
        .create(
            exec,
            &AuditEventRecord {
                id: workledger::ident::AUDIT_EVENTS.format(seq),
                scope_id: Some(ScopeId::new("SHOP-001")),
                timestamp,
                actor_id: None,
                source: "ledger".into(),
                version: "abc123".into(),
                entity_type: "task".into(),
                entity_id: format!("TASK-{:03}", seq),
                action: AuditAction::Create,
                field_name: None,
                old_value: None,
                new_value: None,
                created_at: None,
            },
        )
        .await
        .unwrap();

    OperationalEventRepository::new()
        .create(
            exec,
            &OperationalEventRecord {
                id: EntityId::new(format!("OE-{:04}", seq)),
                scope_id: None,
                timestamp,
                actor_id: None,
                source: "poll".into(),
                version: "abc123".into(),
                level: Level::Info,
                message: format!("event {}", seq),
                data_json: String::new(),
                created_at: None,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_prune_with_threshold_older_than_everything_is_noop() {
    let ledger = open_ledger().await;
    seed_hierarchy(&ledger).await;
    let pool = ledger.pool().as_ref();
    insert_aged(pool, 1, TimeDelta::days(10)).await;
    insert_aged(pool, 2, TimeDelta::days(2)).await;

    let report = ledger.retention().prune(30).await.unwrap();
    assert_eq!(report, PruneReport::default());
    assert_eq!(count(pool, "audit_events").await, 2);
    assert_eq!(count(pool, "operational_events").await, 2);
}

#[tokio::test]
async fn test_prune_removes_only_older_rows_and_is_idempotent() {
    let ledger = open_ledger().await;
    seed_hierarchy(&ledger).await;
    let pool = ledger.pool().as_ref();
    insert_aged(pool, 1, TimeDelta::days(40)).await;
    insert_aged(pool, 2, TimeDelta::days(31)).await;
    insert_aged(pool, 3, TimeDelta::days(1)).await;

    let first = ledger.retention().prune(30).await.unwrap();
    assert_eq!(
        first,
        PruneReport {
            audit: 2,
            operational: 2
        }
    );

    let second = ledger.retention().prune(30).await.unwrap();
    assert_eq!(second.total(), 0);

    let remaining = AuditEventRepository::new()
        .get(pool, "WE-0003")
        .await
        .unwrap();
    assert_eq!(remaining.entity_id, "TASK-003");
}

#[tokio::test]
async fn test_prune_zero_days_removes_past_rows() {
    let ledger = open_ledger().await;
    seed_hierarchy(&ledger).await;
    let pool = ledger.pool().as_ref();
    insert_aged(pool, 1, TimeDelta::seconds(5)).await;
    insert_aged(pool, 2, TimeDelta::minutes(1)).await;

    let report = ledger.retention().prune(0).await.unwrap();
    assert_eq!(report.total(), 4);
    assert_eq!(ledger.retention().prune(0).await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_repositories_prune_independently() {
    let ledger = open_ledger().await;
    seed_hierarchy(&ledger).await;
    let pool = ledger.pool().as_ref();
    insert_aged(pool, 1, TimeDelta::days(10)).await;

    let audit = AuditEventRepository::new()
        .prune_older_than(pool, 5)
        .await
        .unwrap();
    assert_eq!(audit, 1);
    assert_eq!(count(pool, "audit_events").await, 0);
    assert_eq!(count(pool, "operational_events").await, 1);

    let operational = OperationalEventRepository::new()
        .prune_older_than(pool, 5)
        .await
        .unwrap();
    assert_eq!(operational, 1);
}

#[tokio::test]
async fn test_negative_days_rejected() {
    let ledger = open_ledger().await;

    let err = ledger.retention().prune(-1).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidArgument(_)));

    let err = ledger
        .retention()
        .spawn_sweeper(Duration::from_millis(10), -3)
        .err()
        .unwrap();
    assert!(matches!(err, LedgerError::InvalidArgument(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweeper_prunes_until_stopped() {
    let ledger = open_ledger().await;
    seed_hierarchy(&ledger).await;
    let pool = ledger.pool().as_ref();
    insert_aged(pool, 1, TimeDelta::days(3)).await;

    let sweeper = ledger
        .retention()
        .spawn_sweeper(Duration::from_millis(20), 1)
        .unwrap();

    let mut remaining = i64::MAX;
    for _ in 0..100 {
        remaining =
            count(pool, "audit_events").await + count(pool, "operational_events").await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);

    sweeper.stop().await.unwrap();

    // Nothing prunes once stopped.
    insert_aged(pool, 2, TimeDelta::days(3)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count(pool, "audit_events").await, 1);
}
