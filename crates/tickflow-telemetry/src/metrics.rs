//! Prometheus metrics for tickflow.
//!
//! Covers the full pipeline:
//! - Tick ingestion and rejection
//! - Signal emission
//! - Bus health (pending entries, redeliveries, write retries, local buffer)
//! - Inference backends (breaker state, latency, outcomes)
//! - Order decisions and end-to-end latency
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which must crash at startup. These panics
//! only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_histogram_vec,
    register_int_gauge, CounterVec, Encoder, GaugeVec, Histogram, HistogramVec, IntGauge,
    TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

// =============================================================================
// Ticks
// =============================================================================

/// Ticks accepted into symbol state.
pub static TICKS_PROCESSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_ticks_processed_total",
        "Total ticks applied to symbol state",
        &["symbol"]
    )
    .unwrap()
});

/// Ticks rejected as malformed.
/// Labels: reason (invalid_price/invalid_volume/parse)
pub static TICKS_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_ticks_rejected_total",
        "Total ticks rejected as malformed",
        &["reason"]
    )
    .unwrap()
});

/// Ticks dropped for arriving out of order.
pub static TICKS_OUT_OF_ORDER_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_ticks_out_of_order_total",
        "Total ticks dropped as out of order",
        &["symbol"]
    )
    .unwrap()
});

// =============================================================================
// Signals
// =============================================================================

pub static SIGNALS_EMITTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_signals_emitted_total",
        "Total signals emitted by the detector",
        &["symbol", "pattern"]
    )
    .unwrap()
});

/// Distribution of emitted scores.
pub static SIGNAL_SCORE: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "tickflow_signal_score",
        "Score of emitted signals",
        vec![-1.0, -0.8, -0.6, -0.4, -0.3, 0.0, 0.3, 0.4, 0.6, 0.8, 1.0]
    )
    .unwrap()
});

// =============================================================================
// Bus
// =============================================================================

/// Delivered but un-acked entries per consumer group.
pub static CONSUMER_PENDING: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickflow_consumer_pending",
        "Pending (delivered, un-acked) entries per consumer group",
        &["stream", "group"]
    )
    .unwrap()
});

pub static REDELIVERIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_redeliveries_total",
        "Total entries redelivered after lease expiry",
        &["stream", "group"]
    )
    .unwrap()
});

/// Labels: stage (decision/order_publish)
pub static DUPLICATES_SKIPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_duplicates_skipped_total",
        "Total duplicate ids skipped by idempotent consumers",
        &["stage"]
    )
    .unwrap()
});

pub static BUS_WRITE_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_bus_write_retries_total",
        "Total bus append retries",
        &["stream"]
    )
    .unwrap()
});

/// Entries held in producer-local buffers.
pub static BUS_BUFFERED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tickflow_bus_buffered",
        "Entries held in local producer buffers awaiting bus recovery"
    )
    .unwrap()
});

pub static BUS_ALERTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_bus_alerts_total",
        "Total bus write failures that exhausted retries",
        &["stream"]
    )
    .unwrap()
});

// =============================================================================
// Inference
// =============================================================================

/// 0 = closed, 1 = half-open, 2 = open.
pub static INFERENCE_BACKEND_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickflow_inference_backend_state",
        "Inference backend circuit state (0=closed, 1=half-open, 2=open)",
        &["backend"]
    )
    .unwrap()
});

pub static INFERENCE_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tickflow_inference_latency_ms",
        "Latency of successful inference calls in milliseconds",
        &["backend"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 150.0, 200.0, 500.0]
    )
    .unwrap()
});

/// Labels: outcome (gpu/cpu/unavailable/deadline)
pub static INFERENCE_OUTCOME_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_inference_outcome_total",
        "Total orchestrated inference outcomes",
        &["outcome"]
    )
    .unwrap()
});

// =============================================================================
// Decisions
// =============================================================================

pub static ORDERS_PUBLISHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_orders_published_total",
        "Total order decisions published",
        &["symbol", "side"]
    )
    .unwrap()
});

/// Labels: reason (below_threshold/zero_quantity/malformed)
pub static SIGNALS_DISCARDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_signals_discarded_total",
        "Total signals discarded by the decision engine",
        &["reason"]
    )
    .unwrap()
});

pub static SIGNAL_TO_ORDER_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "tickflow_signal_to_order_latency_ms",
        "Latency from signal append to order publish in milliseconds",
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 300.0, 500.0, 1000.0, 2000.0]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record a tick applied to state.
    pub fn tick_processed(symbol: &str) {
        TICKS_PROCESSED_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn tick_rejected(reason: &str) {
        TICKS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn tick_out_of_order(symbol: &str) {
        TICKS_OUT_OF_ORDER_TOTAL.with_label_values(&[symbol]).inc();
    }

    /// Record an emitted signal and its score.
    pub fn signal_emitted(symbol: &str, pattern: &str, score: f64) {
        SIGNALS_EMITTED_TOTAL
            .with_label_values(&[symbol, pattern])
            .inc();
        SIGNAL_SCORE.observe(score);
    }

    pub fn consumer_pending(stream: &str, group: &str, pending: usize) {
        CONSUMER_PENDING
            .with_label_values(&[stream, group])
            .set(pending as f64);
    }

    pub fn redelivered(stream: &str, group: &str) {
        REDELIVERIES_TOTAL.with_label_values(&[stream, group]).inc();
    }

    pub fn duplicate_skipped(stage: &str) {
        DUPLICATES_SKIPPED_TOTAL.with_label_values(&[stage]).inc();
    }

    pub fn bus_write_retry(stream: &str) {
        BUS_WRITE_RETRIES_TOTAL.with_label_values(&[stream]).inc();
    }

    /// Adjust the buffered-entry gauge shared by all producers.
    pub fn bus_buffered_add(delta: i64) {
        BUS_BUFFERED.add(delta);
    }

    /// Record a bus write that exhausted its retries.
    pub fn bus_alert(stream: &str) {
        BUS_ALERTS_TOTAL.with_label_values(&[stream]).inc();
    }

    /// Set breaker state: 0 closed, 1 half-open, 2 open.
    pub fn backend_state(backend: &str, state: u8) {
        INFERENCE_BACKEND_STATE
            .with_label_values(&[backend])
            .set(f64::from(state));
    }

    pub fn inference_latency(backend: &str, latency_ms: f64) {
        INFERENCE_LATENCY_MS
            .with_label_values(&[backend])
            .observe(latency_ms);
    }

    pub fn inference_outcome(outcome: &str) {
        INFERENCE_OUTCOME_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn order_published(symbol: &str, side: &str) {
        ORDERS_PUBLISHED_TOTAL
            .with_label_values(&[symbol, side])
            .inc();
    }

    pub fn signal_discarded(reason: &str) {
        SIGNALS_DISCARDED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn signal_to_order_latency(latency_ms: f64) {
        SIGNAL_TO_ORDER_LATENCY_MS.observe(latency_ms);
    }
}

/// Encode the default registry in Prometheus text format.
pub fn render() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder
        .encode(&families, &mut buf)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
}
