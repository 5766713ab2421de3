//! Bus producer with bounded retry and local buffering.
//!
//! A write is retried with capped exponential backoff. When retries are
//! exhausted the entry goes to a bounded local buffer, an alert is raised and
//! the caller continues; the buffer drains on the next successful write or an
//! explicit [`BusProducer::flush`]. Repeated exhaustion marks the producer
//! unhealthy until a write succeeds again.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickflow_telemetry::Metrics;
use tracing::{error, info, warn};

use crate::config::BusConfig;
use crate::dedup::RecentIds;
use crate::entry::BusEntry;
use crate::error::BusResult;
use crate::stream::StreamBus;

/// What happened to a publish call.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Appended(BusEntry),
    /// Retries exhausted; held locally until the bus recovers.
    Buffered,
    /// Dedup key already published by this producer.
    Duplicate,
}

#[derive(Debug, Clone)]
struct BufferedWrite {
    /// Buffer-local sequence, assigned on insert.
    seq: u64,
    stream: String,
    correlation_id: String,
    payload: serde_json::Value,
}

/// Dedup key reserved by an in-flight publish. Released on drop unless the
/// write was committed, so an abandoned or failed publish can be retried.
struct KeyClaim<'a> {
    seen: &'a Mutex<RecentIds>,
    key: Option<&'a str>,
}

impl KeyClaim<'_> {
    fn commit(mut self) {
        self.key = None;
    }
}

impl Drop for KeyClaim<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.seen.lock().remove(key);
        }
    }
}

pub struct BusProducer {
    bus: Arc<dyn StreamBus>,
    config: BusConfig,
    /// Label for the duplicate-skip metric.
    stage: &'static str,
    buffer: Mutex<VecDeque<BufferedWrite>>,
    buffered_seq: AtomicU64,
    flushing: tokio::sync::Mutex<()>,
    seen: Mutex<RecentIds>,
    consecutive_failures: AtomicU32,
    healthy: AtomicBool,
}

impl BusProducer {
    pub fn new(bus: Arc<dyn StreamBus>, config: BusConfig, stage: &'static str) -> Self {
        let seen = RecentIds::new(config.dedup_capacity);
        Self {
            bus,
            config,
            stage,
            buffer: Mutex::new(VecDeque::new()),
            buffered_seq: AtomicU64::new(0),
            flushing: tokio::sync::Mutex::new(()),
            seen: Mutex::new(seen),
            consecutive_failures: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    /// Publish a payload, deduplicating on `dedup_key` when given.
    ///
    /// Only non-retryable errors surface; bus outages end in `Buffered`.
    pub async fn publish(
        &self,
        stream: &str,
        correlation_id: &str,
        dedup_key: Option<&str>,
        payload: serde_json::Value,
    ) -> BusResult<PublishOutcome> {
        let claim = match dedup_key {
            Some(key) => {
                if !self.seen.lock().insert(key) {
                    Metrics::duplicate_skipped(self.stage);
                    info!(stream, dedup_key = key, "Duplicate publish skipped");
                    return Ok(PublishOutcome::Duplicate);
                }
                KeyClaim {
                    seen: &self.seen,
                    key: Some(key),
                }
            }
            None => KeyClaim {
                seen: &self.seen,
                key: None,
            },
        };

        // Older buffered writes go first to keep per-stream order
        if self.buffered_len() > 0 {
            self.flush().await;
            if self.buffered_len() > 0 {
                self.record_failure();
                self.buffer_write(stream, correlation_id, payload);
                claim.commit();
                return Ok(PublishOutcome::Buffered);
            }
        }

        let mut attempt = 0u32;
        loop {
            match self.bus.append(stream, correlation_id, payload.clone()).await {
                Ok(entry) => {
                    self.record_success();
                    claim.commit();
                    return Ok(PublishOutcome::Appended(entry));
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt < self.config.max_retries => {
                    let delay = self.config.backoff_ms(attempt);
                    warn!(
                        stream,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay,
                        error = %e,
                        "Bus write failed, retrying"
                    );
                    Metrics::bus_write_retry(stream);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        stream,
                        attempts = attempt + 1,
                        error = %e,
                        "Bus write retries exhausted, buffering locally"
                    );
                    Metrics::bus_alert(stream);
                    self.record_failure();
                    self.buffer_write(stream, correlation_id, payload);
                    claim.commit();
                    return Ok(PublishOutcome::Buffered);
                }
            }
        }
    }

    /// Try to drain the local buffer, one attempt per entry, stopping at the
    /// first failure. Returns the number of entries written.
    ///
    /// An entry leaves the buffer only after its append succeeds, so a flush
    /// dropped mid-append keeps it for the next attempt.
    pub async fn flush(&self) -> usize {
        let Ok(_guard) = self.flushing.try_lock() else {
            return 0;
        };

        let mut written = 0;
        loop {
            let Some(next) = self.buffer.lock().front().cloned() else {
                break;
            };
            match self
                .bus
                .append(&next.stream, &next.correlation_id, next.payload.clone())
                .await
            {
                Ok(_) => {
                    written += 1;
                    let mut buffer = self.buffer.lock();
                    // The front may have been evicted by a full buffer meanwhile
                    if buffer.front().is_some_and(|w| w.seq == next.seq) {
                        buffer.pop_front();
                        Metrics::bus_buffered_add(-1);
                    }
                }
                Err(e) => {
                    warn!(stream = %next.stream, error = %e, "Buffer flush stalled");
                    break;
                }
            }
        }

        if written > 0 {
            info!(written, remaining = self.buffered_len(), "Flushed buffered bus writes");
            if self.buffered_len() == 0 {
                self.record_success();
            }
        }
        written
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// False after `unhealthy_after` consecutive exhausted writes.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    fn buffer_write(&self, stream: &str, correlation_id: &str, payload: serde_json::Value) {
        let write = BufferedWrite {
            seq: self.buffered_seq.fetch_add(1, Ordering::SeqCst),
            stream: stream.to_string(),
            correlation_id: correlation_id.to_string(),
            payload,
        };
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.config.buffer_capacity {
            if let Some(dropped) = buffer.pop_front() {
                error!(stream = %dropped.stream, "Local bus buffer full, dropping oldest entry");
                Metrics::bus_alert(&dropped.stream);
                Metrics::bus_buffered_add(-1);
            }
        }
        buffer.push_back(write);
        Metrics::bus_buffered_add(1);
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        if !self.healthy.swap(true, Ordering::SeqCst) {
            info!(stage = self.stage, "Bus producer recovered");
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.unhealthy_after && self.healthy.swap(false, Ordering::SeqCst) {
            error!(
                stage = self.stage,
                consecutive_failures = failures,
                "Bus persistently unreachable"
            );
        }
    }
}
