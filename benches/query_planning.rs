//! Query planning and execution benchmark

use millwright::clock::BoundedClock;
use millwright::clock::MILLIS_PER_DAY;
use millwright::connection::{ConnectionManager, ConnectionManagerConfig, MemoryConnector};
use millwright::control_plane::{ClusterType, Credentials, LocalControlPlane};
use millwright::ingestion::{IngestionConfig, IngestionPipeline};
use millwright::lifecycle::{ClusterRequest, LifecycleConfig, LifecycleManager, SimulatedBackend};
use millwright::model::{SensorReading, SensorType, TimeRange};
use millwright::query::{plan, QueryConfig, QueryPlanner, TelemetryQuery};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

const T0: i64 = 1_700_000_000_000;
const SENSORS: usize = 20;

fn benchmark_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    group.throughput(Throughput::Elements(1));

    for days in [1, 5, 30] {
        let range = TimeRange::new(T0, T0 + days * MILLIS_PER_DAY);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{days}d")), &range, |b, range| {
            b.iter(|| black_box(plan(*range, black_box(SENSORS), black_box(5_000)).unwrap()));
        });
    }

    group.finish();
}

async fn loaded_planner(readings: usize) -> QueryPlanner {
    let store = Arc::new(LocalControlPlane::new());
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(MemoryConnector::new()),
        ConnectionManagerConfig::default(),
    ));
    let lifecycle = LifecycleManager::new(
        store.clone(),
        Arc::new(SimulatedBackend::new(Duration::ZERO)),
        connections.clone(),
        Arc::new(BoundedClock::new()),
        LifecycleConfig::default(),
    );
    lifecycle
        .create_cluster(ClusterRequest {
            cluster_id: "bench".to_string(),
            display_key: None,
            cluster_type: ClusterType::Analytics,
            region: "local".to_string(),
            node_count: 1,
            cpu_per_node: 4,
            memory_per_node: 16,
            storage_per_node: 100,
            archive_enabled: false,
            database: None,
            admin_credentials: Credentials::new("admin", "admin"),
            readonly_credentials: Credentials::new("reader", "reader"),
        })
        .await
        .unwrap();
    lifecycle.wait("bench").await;

    let batch: Vec<SensorReading> = (0..readings)
        .map(|i| {
            SensorReading::new(
                1,
                "line-1",
                format!("sensor-{}", i % SENSORS),
                SensorType::Vibration,
                T0 + (i / SENSORS) as i64 * 1_000,
                (i % 100) as f64 / 10.0,
                "mm/s",
            )
        })
        .collect();
    IngestionPipeline::new(store.clone(), connections.clone(), IngestionConfig::default())
        .ingest_readings("bench", batch)
        .await
        .unwrap();

    QueryPlanner::new(store, connections, QueryConfig::default())
}

fn benchmark_execute_raw(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let planner = rt.block_on(loaded_planner(100_000));

    let mut group = c.benchmark_group("execute_raw");
    for max_points in [1_000usize, 10_000] {
        let query = TelemetryQuery {
            sensor_ids: (0..SENSORS).map(|i| format!("sensor-{i}")).collect(),
            time_range: TimeRange::new(T0, T0 + 3_600_000),
            max_points,
        };
        group.throughput(Throughput::Elements(max_points as u64));
        group.bench_with_input(BenchmarkId::from_parameter(max_points), &query, |b, query| {
            b.to_async(&rt).iter(|| async {
                black_box(planner.execute("bench", query).await.unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_plan, benchmark_execute_raw);
criterion_main!(benches);
