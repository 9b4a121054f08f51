use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "stream_session_operations_total",
            "Coordinator operations by name and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("failed to create stream_session_operations_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_session_operations_total");
    counter
});

static OPERATION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "stream_session_operation_duration_seconds",
            "Coordinator operation latency including lock waits and retries",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["operation"],
    )
    .expect("failed to create stream_session_operation_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register stream_session_operation_duration_seconds");
    histogram
});

static BUSY_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "stream_session_busy_total",
            "Requests rejected as Busy after exhausting lock retries",
        ),
        &["operation"],
    )
    .expect("failed to create stream_session_busy_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_session_busy_total");
    counter
});

static LOCK_WAIT_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "stream_session_lock_wait_seconds",
            "Time spent waiting for per-stream and per-viewer locks",
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0]),
        &["scope"],
    )
    .expect("failed to create stream_session_lock_wait_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register stream_session_lock_wait_seconds");
    histogram
});

static CAMERA_SWITCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "stream_session_camera_switches_total",
            "Primary camera switch requests by result",
        ),
        &["result"],
    )
    .expect("failed to create stream_session_camera_switches_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_session_camera_switches_total");
    counter
});

static REACTIONS_COALESCED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "stream_session_reactions_coalesced_total",
        "Reaction requests folded into an identical in-flight request",
    )
    .expect("failed to create stream_session_reactions_coalesced_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_session_reactions_coalesced_total");
    counter
});

static COUNTER_REPAIRS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "stream_session_counter_repairs_total",
        "Cached stream counters found drifted and rewritten from rows",
    )
    .expect("failed to create stream_session_counter_repairs_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register stream_session_counter_repairs_total");
    counter
});

static ACTIVE_VIEWERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "stream_session_active_viewers",
        "Active viewer sessions across live streams",
    )
    .expect("failed to create stream_session_active_viewers");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register stream_session_active_viewers");
    gauge
});

pub fn observe_operation(operation: &str, outcome: &str, elapsed: Duration) {
    OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(elapsed.as_secs_f64());
}

pub fn record_busy(operation: &str) {
    BUSY_TOTAL.with_label_values(&[operation]).inc();
}

pub fn observe_lock_wait(scope: &str, elapsed: Duration) {
    LOCK_WAIT_SECONDS
        .with_label_values(&[scope])
        .observe(elapsed.as_secs_f64());
}

pub fn record_camera_switch(result: &str) {
    CAMERA_SWITCHES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_coalesced_reaction() {
    REACTIONS_COALESCED_TOTAL.inc();
}

pub fn record_counter_repair() {
    COUNTER_REPAIRS_TOTAL.inc();
}

pub fn viewer_joined() {
    ACTIVE_VIEWERS.inc();
}

pub fn viewers_left(count: u64) {
    ACTIVE_VIEWERS.sub(count as i64);
}

/// Resync the gauge with the row counts found by the reconciler.
pub fn set_active_viewers(total: i64) {
    ACTIVE_VIEWERS.set(total);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
