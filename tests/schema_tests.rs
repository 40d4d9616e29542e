//! Schema registry application against in-memory servers

use millwright::clock::BoundedClock;
use millwright::engine::{MemoryEngine, TelemetryEngine};
use millwright::schema::{SchemaRegistry, StorageTier, TableKind};
use millwright::Error;

#[tokio::test]
async fn test_apply_is_idempotent() {
    let engine = MemoryEngine::new();
    let registry = SchemaRegistry::new();

    let first = registry.apply(&engine, "telemetry").await.unwrap();
    assert_eq!(first.created.len(), 7);
    assert!(first.existing.is_empty());
    assert_eq!(engine.object_count(), 7);

    let second = registry.apply(&engine, "telemetry").await.unwrap();
    assert!(second.created.is_empty());
    assert_eq!(second.existing.len(), 7);
    assert_eq!(engine.object_count(), 7);
}

#[tokio::test]
async fn test_every_table_and_view_is_created() {
    let engine = MemoryEngine::new();
    SchemaRegistry::new().apply(&engine, "telemetry").await.unwrap();

    for kind in TableKind::ALL {
        assert!(engine.has_object(kind.table_name()), "missing {}", kind.table_name());
    }
    let stats = engine.table_stats(TableKind::SensorReadings).await.unwrap();
    assert_eq!(stats.rows, 0);
}

#[tokio::test]
async fn test_ddl_failure_names_the_object() {
    let engine = MemoryEngine::new();
    engine.faults().fail_ddl("disk quota exceeded");

    let err = SchemaRegistry::new()
        .apply(&engine, "telemetry")
        .await
        .unwrap_err();
    match err {
        Error::Schema(msg) => assert!(msg.contains("disk quota exceeded")),
        other => panic!("expected schema error, got {other:?}"),
    }
}

#[test]
fn test_readings_move_through_tiers_with_age() {
    let registry = SchemaRegistry::new();
    let now = 1_700_000_000_000;
    let clock = BoundedClock::with_offset(now - chrono::Utc::now().timestamp_millis());
    let day = millwright::clock::MILLIS_PER_DAY;

    assert_eq!(
        registry.tier_of(TableKind::SensorReadings, now - day, &clock),
        StorageTier::Hot
    );
    assert_ne!(
        registry.tier_of(TableKind::SensorReadings, now - 200 * day, &clock),
        StorageTier::Hot
    );
}
