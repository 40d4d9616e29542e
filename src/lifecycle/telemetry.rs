//! Lifecycle telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct LifecycleInstruments {
    transitions: Counter<u64>,
    stage_retries: Counter<u64>,
    failures: Counter<u64>,
    provisioning_duration_seconds: Histogram<f64>,
    scale_requests: Counter<u64>,
}

fn instruments() -> &'static LifecycleInstruments {
    static INSTRUMENTS: OnceLock<LifecycleInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("millwright.lifecycle");
        LifecycleInstruments {
            transitions: meter
                .u64_counter("millwright.lifecycle.transitions")
                .with_description("Persisted cluster status transitions")
                .init(),
            stage_retries: meter
                .u64_counter("millwright.lifecycle.stage.retries")
                .with_description("Provisioning stage retries after transient errors")
                .init(),
            failures: meter
                .u64_counter("millwright.lifecycle.failures")
                .with_description("Clusters parked in the error state")
                .init(),
            provisioning_duration_seconds: meter
                .f64_histogram("millwright.lifecycle.provisioning.duration")
                .with_description("Time from request to active")
                .with_unit("s")
                .init(),
            scale_requests: meter
                .u64_counter("millwright.lifecycle.scale.requests")
                .with_description("Scale requests by outcome")
                .init(),
        }
    })
}

pub fn record_transition(status: &'static str) {
    instruments()
        .transitions
        .add(1, &[KeyValue::new("status", status)]);
}

pub fn record_stage_retry(stage: &'static str) {
    instruments()
        .stage_retries
        .add(1, &[KeyValue::new("stage", stage)]);
}

pub fn record_failure(phase: &'static str) {
    instruments()
        .failures
        .add(1, &[KeyValue::new("phase", phase)]);
}

pub fn record_provisioned(duration_seconds: f64) {
    instruments()
        .provisioning_duration_seconds
        .record(duration_seconds, &[]);
}

pub fn record_scale(outcome: &'static str) {
    instruments()
        .scale_requests
        .add(1, &[KeyValue::new("outcome", outcome)]);
}
