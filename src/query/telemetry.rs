//! Query-path telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct QueryInstruments {
    query_requests: Counter<u64>,
    query_duration_seconds: Histogram<f64>,
    query_rows_returned: Histogram<u64>,
}

fn instruments() -> &'static QueryInstruments {
    static INSTRUMENTS: OnceLock<QueryInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("millwright.query");
        QueryInstruments {
            query_requests: meter
                .u64_counter("millwright.query.requests")
                .with_description("Telemetry queries by resolution and outcome")
                .init(),
            query_duration_seconds: meter
                .f64_histogram("millwright.query.duration")
                .with_description("End-to-end telemetry query latency")
                .with_unit("s")
                .init(),
            query_rows_returned: meter
                .u64_histogram("millwright.query.rows.returned")
                .with_description("Points returned per query")
                .init(),
        }
    })
}

pub fn record_query(
    resolution: &'static str,
    outcome: &'static str,
    duration_seconds: f64,
    rows: usize,
) {
    let inst = instruments();
    let labels = [
        KeyValue::new("resolution", resolution),
        KeyValue::new("outcome", outcome),
    ];
    inst.query_requests.add(1, &labels);
    inst.query_duration_seconds.record(duration_seconds, &labels);
    if outcome == "ok" {
        inst.query_rows_returned
            .record(rows as u64, &[KeyValue::new("resolution", resolution)]);
    }
}
