//! Ingestion telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct IngestionInstruments {
    requests: Counter<u64>,
    records: Counter<u64>,
    chunks: Counter<u64>,
    chunk_duration_seconds: Histogram<f64>,
    batch_duration_seconds: Histogram<f64>,
}

fn instruments() -> &'static IngestionInstruments {
    static INSTRUMENTS: OnceLock<IngestionInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("millwright.ingestion");
        IngestionInstruments {
            requests: meter
                .u64_counter("millwright.ingestion.requests")
                .with_description("Ingestion calls by table and outcome")
                .init(),
            records: meter
                .u64_counter("millwright.ingestion.records")
                .with_description("Records acknowledged by the engine")
                .init(),
            chunks: meter
                .u64_counter("millwright.ingestion.chunks")
                .with_description("Chunk writes by outcome")
                .init(),
            chunk_duration_seconds: meter
                .f64_histogram("millwright.ingestion.chunk.duration")
                .with_description("Latency of a single chunk write")
                .with_unit("s")
                .init(),
            batch_duration_seconds: meter
                .f64_histogram("millwright.ingestion.batch.duration")
                .with_description("Latency of a whole ingestion call")
                .with_unit("s")
                .init(),
        }
    })
}

pub fn record_request(table: &'static str, outcome: &'static str) {
    instruments().requests.add(
        1,
        &[
            KeyValue::new("table", table),
            KeyValue::new("outcome", outcome),
        ],
    );
}

pub fn record_chunk(
    table: &'static str,
    outcome: &'static str,
    records: usize,
    duration_seconds: f64,
) {
    let inst = instruments();
    let labels = [
        KeyValue::new("table", table),
        KeyValue::new("outcome", outcome),
    ];
    inst.chunks.add(1, &labels);
    inst.chunk_duration_seconds.record(duration_seconds, &labels);
    if outcome == "ok" {
        inst.records
            .add(records as u64, &[KeyValue::new("table", table)]);
    }
}

pub fn record_batch_duration(table: &'static str, duration_seconds: f64) {
    instruments()
        .batch_duration_seconds
        .record(duration_seconds, &[KeyValue::new("table", table)]);
}
