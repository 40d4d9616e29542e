//! Health monitor telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct HealthInstruments {
    probes: Counter<u64>,
    probe_duration_seconds: Histogram<f64>,
    skipped_probes: Counter<u64>,
    sweep_duration_seconds: Histogram<f64>,
}

fn instruments() -> &'static HealthInstruments {
    static INSTRUMENTS: OnceLock<HealthInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("millwright.health");
        HealthInstruments {
            probes: meter
                .u64_counter("millwright.health.probes")
                .with_description("Cluster probes by verdict")
                .init(),
            probe_duration_seconds: meter
                .f64_histogram("millwright.health.probe.duration")
                .with_description("Latency of one cluster probe")
                .with_unit("s")
                .init(),
            skipped_probes: meter
                .u64_counter("millwright.health.probes.skipped")
                .with_description("Probes skipped because one was already in flight")
                .init(),
            sweep_duration_seconds: meter
                .f64_histogram("millwright.health.sweep.duration")
                .with_description("Latency of a full sweep over active clusters")
                .with_unit("s")
                .init(),
        }
    })
}

pub fn record_probe(verdict: &'static str, duration_seconds: f64) {
    let inst = instruments();
    let labels = [KeyValue::new("verdict", verdict)];
    inst.probes.add(1, &labels);
    inst.probe_duration_seconds.record(duration_seconds, &labels);
}

pub fn record_skipped_probe() {
    instruments().skipped_probes.add(1, &[]);
}

pub fn record_sweep(clusters: usize, duration_seconds: f64) {
    instruments().sweep_duration_seconds.record(
        duration_seconds,
        &[KeyValue::new("clusters", clusters as i64)],
    );
}
