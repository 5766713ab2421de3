//! Periodic pipeline statistics.
//!
//! Reads counters and histograms back from the registry and logs a summary:
//! - per-symbol ticks processed, out-of-order drops and signals emitted
//! - order decisions published and discards
//! - redeliveries, duplicate skips and bus alerts
//! - signal-to-order latency distribution (P50/P95/P99)

use crate::metrics::{
    BUS_ALERTS_TOTAL, DUPLICATES_SKIPPED_TOTAL, ORDERS_PUBLISHED_TOTAL, REDELIVERIES_TOTAL,
    SIGNALS_DISCARDED_TOTAL, SIGNALS_EMITTED_TOTAL, SIGNAL_TO_ORDER_LATENCY_MS,
    TICKS_OUT_OF_ORDER_TOTAL, TICKS_PROCESSED_TOTAL,
};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::proto::Metric;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Counters for a single symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolStats {
    pub symbol: String,
    pub ticks_processed: u64,
    pub ticks_out_of_order: u64,
    pub signals_emitted: u64,
}

/// Whole-pipeline snapshot.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub uptime_secs: i64,
    pub symbols: Vec<SymbolStats>,
    pub orders_published: u64,
    pub signals_discarded: u64,
    pub redeliveries: u64,
    pub duplicates_skipped: u64,
    pub bus_alerts: u64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
}

/// Statistics reporter.
pub struct StatsReporter {
    start_time: DateTime<Utc>,
}

impl Default for StatsReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsReporter {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
        }
    }

    /// Snapshot current values. Symbols are discovered from label values.
    pub fn get_stats(&self) -> PipelineStats {
        let mut symbols: BTreeMap<String, SymbolStats> = BTreeMap::new();

        for (labels, value) in counter_samples(&*TICKS_PROCESSED_TOTAL) {
            if let Some(symbol) = labels.first() {
                let entry = symbols.entry(symbol.clone()).or_default();
                entry.symbol = symbol.clone();
                entry.ticks_processed += value as u64;
            }
        }
        for (labels, value) in counter_samples(&*TICKS_OUT_OF_ORDER_TOTAL) {
            if let Some(symbol) = labels.first() {
                let entry = symbols.entry(symbol.clone()).or_default();
                entry.symbol = symbol.clone();
                entry.ticks_out_of_order += value as u64;
            }
        }
        // Aggregated across pattern labels
        for (labels, value) in counter_samples(&*SIGNALS_EMITTED_TOTAL) {
            if let Some(symbol) = labels.first() {
                let entry = symbols.entry(symbol.clone()).or_default();
                entry.symbol = symbol.clone();
                entry.signals_emitted += value as u64;
            }
        }

        let (latency_p50_ms, latency_p95_ms, latency_p99_ms) = latency_percentiles();

        PipelineStats {
            uptime_secs: (Utc::now() - self.start_time).num_seconds(),
            symbols: symbols.into_values().collect(),
            orders_published: counter_total(&*ORDERS_PUBLISHED_TOTAL),
            signals_discarded: counter_total(&*SIGNALS_DISCARDED_TOTAL),
            redeliveries: counter_total(&*REDELIVERIES_TOTAL),
            duplicates_skipped: counter_total(&*DUPLICATES_SKIPPED_TOTAL),
            bus_alerts: counter_total(&*BUS_ALERTS_TOTAL),
            latency_p50_ms,
            latency_p95_ms,
            latency_p99_ms,
        }
    }

    /// Log the current snapshot.
    pub fn log_summary(&self) {
        let stats = self.get_stats();

        for s in &stats.symbols {
            info!(
                symbol = %s.symbol,
                ticks_processed = s.ticks_processed,
                ticks_out_of_order = s.ticks_out_of_order,
                signals_emitted = s.signals_emitted,
                "Symbol stats"
            );
        }

        info!(
            uptime_secs = stats.uptime_secs,
            orders_published = stats.orders_published,
            signals_discarded = stats.signals_discarded,
            redeliveries = stats.redeliveries,
            duplicates_skipped = stats.duplicates_skipped,
            bus_alerts = stats.bus_alerts,
            latency_p50_ms = format!("{:.1}", stats.latency_p50_ms),
            latency_p95_ms = format!("{:.1}", stats.latency_p95_ms),
            latency_p99_ms = format!("{:.1}", stats.latency_p99_ms),
            "Pipeline stats"
        );
    }

    /// Log a summary every `interval` until cancelled.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.log_summary();
                    break;
                }
                _ = ticker.tick() => self.log_summary(),
            }
        }
    }
}

/// (label values, counter value) for every child of a counter vec.
fn counter_samples<C: Collector>(collector: &C) -> Vec<(Vec<String>, f64)> {
    let mut out = Vec::new();
    for mf in collector.collect() {
        for m in mf.get_metric() {
            out.push((label_values(m), m.get_counter().get_value()));
        }
    }
    out
}

fn counter_total<C: Collector>(collector: &C) -> u64 {
    counter_samples(collector)
        .into_iter()
        .map(|(_, v)| v)
        .sum::<f64>() as u64
}

fn label_values(m: &Metric) -> Vec<String> {
    m.get_label()
        .iter()
        .map(|pair| pair.get_value().to_string())
        .collect()
}

/// Returns (p50, p95, p99) of the signal-to-order latency histogram.
fn latency_percentiles() -> (f64, f64, f64) {
    for mf in SIGNAL_TO_ORDER_LATENCY_MS.collect() {
        if let Some(m) = mf.get_metric().first() {
            let h = m.get_histogram();
            let count = h.get_sample_count();
            if count == 0 {
                return (0.0, 0.0, 0.0);
            }
            let buckets = h.get_bucket();
            return (
                percentile_from_buckets(buckets, count, 0.50),
                percentile_from_buckets(buckets, count, 0.95),
                percentile_from_buckets(buckets, count, 0.99),
            );
        }
    }
    (0.0, 0.0, 0.0)
}

/// Linear interpolation within the bucket containing the target rank.
fn percentile_from_buckets(
    buckets: &[prometheus::proto::Bucket],
    total_count: u64,
    percentile: f64,
) -> f64 {
    let target = (total_count as f64 * percentile).ceil() as u64;
    let mut prev_bound = 0.0;
    let mut prev_count = 0u64;

    for bucket in buckets {
        let upper_bound = bucket.get_upper_bound();
        let cumulative_count = bucket.get_cumulative_count();

        if cumulative_count >= target {
            let bucket_count = cumulative_count - prev_count;
            if bucket_count == 0 {
                return upper_bound;
            }
            let position = (target - prev_count) as f64 / bucket_count as f64;
            return prev_bound + position * (upper_bound - prev_bound);
        }

        prev_bound = upper_bound;
        prev_count = cumulative_count;
    }

    buckets.last().map(|b| b.get_upper_bound()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;

    #[test]
    fn test_symbol_stats_aggregate_patterns() {
        Metrics::tick_processed("STATS_A");
        Metrics::tick_processed("STATS_A");
        Metrics::tick_out_of_order("STATS_A");
        Metrics::signal_emitted("STATS_A", "volume_spike", 0.5);
        Metrics::signal_emitted("STATS_A", "ema_crossover", -0.5);

        let stats = StatsReporter::new().get_stats();
        let a = stats
            .symbols
            .iter()
            .find(|s| s.symbol == "STATS_A")
            .expect("symbol discovered");
        assert_eq!(a.ticks_processed, 2);
        assert_eq!(a.ticks_out_of_order, 1);
        assert_eq!(a.signals_emitted, 2);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut b1 = prometheus::proto::Bucket::default();
        b1.set_upper_bound(10.0);
        b1.set_cumulative_count(5);
        let mut b2 = prometheus::proto::Bucket::default();
        b2.set_upper_bound(20.0);
        b2.set_cumulative_count(10);
        let buckets = vec![b1, b2];

        assert!((percentile_from_buckets(&buckets, 10, 0.5) - 10.0).abs() < 1e-9);
        assert!((percentile_from_buckets(&buckets, 10, 1.0) - 20.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            StatsReporter::new().run(Duration::from_secs(60), shutdown.clone()),
        );
        tokio::time::sleep(Duration::from_secs(130)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter exits after cancel")
            .unwrap();
    }
}
