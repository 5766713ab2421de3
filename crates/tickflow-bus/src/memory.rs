//! In-process stream bus.
//!
//! Each stream is an ordered log guarded by its own mutex; streams never
//! contend with each other. Consumer groups track a delivery cursor and a
//! pending-entry list with per-entry lease deadlines.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickflow_telemetry::Metrics;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::config::BusConfig;
use crate::entry::{BusEntry, Delivery};
use crate::error::{BusError, BusResult};
use crate::stream::{BoxFuture, StreamBus};

#[derive(Debug)]
struct PendingEntry {
    entry: BusEntry,
    consumer: String,
    lease_deadline: Instant,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Highest seq handed out for the first time.
    last_delivered_seq: u64,
    pending: HashMap<String, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamLog {
    entries: VecDeque<BusEntry>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

impl StreamLog {
    fn append(&mut self, correlation_id: &str, payload: serde_json::Value, max_len: usize) -> BusEntry {
        self.next_seq += 1;
        let ts = Utc::now();
        let entry = BusEntry {
            id: format!("{}-{}", ts.timestamp_millis(), self.next_seq),
            ts,
            seq: self.next_seq,
            correlation_id: correlation_id.to_string(),
            payload,
        };
        self.entries.push_back(entry.clone());
        while self.entries.len() > max_len {
            self.entries.pop_front();
        }
        entry
    }

    /// Index of the first entry with `seq > after`.
    fn first_after(&self, after: u64) -> usize {
        self.entries.partition_point(|e| e.seq <= after)
    }
}

/// In-process [`StreamBus`].
pub struct MemoryBus {
    streams: DashMap<String, Arc<Mutex<StreamLog>>>,
    lease_timeout: Duration,
    max_stream_len: usize,
    appended: Notify,
    unavailable: AtomicBool,
    fail_appends: AtomicU32,
}

impl MemoryBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            streams: DashMap::new(),
            lease_timeout: Duration::from_millis(config.lease_timeout_ms),
            max_stream_len: config.max_stream_len.max(1),
            appended: Notify::new(),
            unavailable: AtomicBool::new(false),
            fail_appends: AtomicU32::new(0),
        }
    }

    /// Fault injection: reject every call while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fault injection: fail the next `n` appends.
    pub fn fail_next_appends(&self, n: u32) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    fn log(&self, stream: &str) -> Arc<Mutex<StreamLog>> {
        self.streams
            .entry(stream.to_string())
            .or_default()
            .clone()
    }

    /// Read paths use this so queries never create streams.
    fn existing(&self, stream: &str) -> Option<Arc<Mutex<StreamLog>>> {
        self.streams.get(stream).map(|log| log.value().clone())
    }

    fn unknown_group(stream: &str, group: &str) -> BusError {
        BusError::UnknownGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    }

    fn check_available(&self) -> BusResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("bus marked unavailable".to_string()));
        }
        Ok(())
    }

    fn append_sync(
        &self,
        stream: &str,
        correlation_id: &str,
        payload: serde_json::Value,
    ) -> BusResult<BusEntry> {
        self.check_available()?;
        let injected = self
            .fail_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BusError::WriteFailure {
                stream: stream.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let log = self.log(stream);
        let entry = log
            .lock()
            .append(correlation_id, payload, self.max_stream_len);
        self.appended.notify_waiters();
        Ok(entry)
    }

    fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> BusResult<Vec<Delivery>> {
        self.check_available()?;
        let log = self
            .existing(stream)
            .ok_or_else(|| Self::unknown_group(stream, group))?;
        let mut log = log.lock();
        let now = Instant::now();
        let lease_deadline = now + self.lease_timeout;

        // Split borrows: entries are read while the group is mutated
        let StreamLog {
            entries, groups, ..
        } = &mut *log;
        let state = groups.get_mut(group).ok_or_else(|| BusError::UnknownGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        })?;

        let mut out = Vec::new();

        let mut expired: Vec<&mut PendingEntry> = state
            .pending
            .values_mut()
            .filter(|p| p.lease_deadline <= now)
            .collect();
        expired.sort_by_key(|p| p.entry.seq);
        for pending in expired.into_iter().take(count) {
            debug!(
                stream,
                group,
                entry_id = %pending.entry.id,
                from = %pending.consumer,
                to = consumer,
                "Reclaiming expired lease"
            );
            pending.consumer = consumer.to_string();
            pending.lease_deadline = lease_deadline;
            pending.delivery_count += 1;
            Metrics::redelivered(stream, group);
            out.push(Delivery {
                stream: stream.to_string(),
                group: group.to_string(),
                consumer: consumer.to_string(),
                entry: pending.entry.clone(),
                delivery_count: pending.delivery_count,
                lease_deadline,
            });
        }

        let cursor = state.last_delivered_seq;
        let start = entries.partition_point(|e| e.seq <= cursor);
        for entry in entries.iter().skip(start).take(count.saturating_sub(out.len())) {
            state.last_delivered_seq = entry.seq;
            state.pending.insert(
                entry.id.clone(),
                PendingEntry {
                    entry: entry.clone(),
                    consumer: consumer.to_string(),
                    lease_deadline,
                    delivery_count: 1,
                },
            );
            out.push(Delivery {
                stream: stream.to_string(),
                group: group.to_string(),
                consumer: consumer.to_string(),
                entry: entry.clone(),
                delivery_count: 1,
                lease_deadline,
            });
        }

        Ok(out)
    }
}

impl StreamBus for MemoryBus {
    fn append<'a>(
        &'a self,
        stream: &'a str,
        correlation_id: &'a str,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, BusResult<BusEntry>> {
        Box::pin(async move { self.append_sync(stream, correlation_id, payload) })
    }

    fn ensure_group<'a>(
        &'a self,
        stream: &'a str,
        group: &'a str,
    ) -> BoxFuture<'a, BusResult<()>> {
        Box::pin(async move {
            self.check_available()?;
            let log = self.log(stream);
            log.lock().groups.entry(group.to_string()).or_default();
            Ok(())
        })
    }

    fn read_group<'a>(
        &'a self,
        stream: &'a str,
        group: &'a str,
        consumer: &'a str,
        count: usize,
        block: Duration,
    ) -> BoxFuture<'a, BusResult<Vec<Delivery>>> {
        Box::pin(async move {
            // Register interest before checking so an append in between is not missed
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let out = self.claim(stream, group, consumer, count)?;
            if !out.is_empty() || block.is_zero() {
                return Ok(out);
            }

            let _ = tokio::time::timeout(block, notified).await;
            self.claim(stream, group, consumer, count)
        })
    }

    fn ack<'a>(
        &'a self,
        stream: &'a str,
        group: &'a str,
        consumer: &'a str,
        entry_id: &'a str,
    ) -> BoxFuture<'a, BusResult<bool>> {
        Box::pin(async move {
            self.check_available()?;
            let log = self
                .existing(stream)
                .ok_or_else(|| Self::unknown_group(stream, group))?;
            let mut log = log.lock();
            let state = log
                .groups
                .get_mut(group)
                .ok_or_else(|| BusError::UnknownGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                })?;

            match state.pending.get(entry_id) {
                None => Ok(false),
                Some(p) if p.consumer != consumer => Err(BusError::LeaseExpired {
                    stream: stream.to_string(),
                    group: group.to_string(),
                    consumer: consumer.to_string(),
                    entry_id: entry_id.to_string(),
                }),
                Some(_) => {
                    state.pending.remove(entry_id);
                    Ok(true)
                }
            }
        })
    }

    fn pending<'a>(&'a self, stream: &'a str, group: &'a str) -> BoxFuture<'a, BusResult<usize>> {
        Box::pin(async move {
            let log = self
                .existing(stream)
                .ok_or_else(|| Self::unknown_group(stream, group))?;
            let log = log.lock();
            log.groups
                .get(group)
                .map(|g| g.pending.len())
                .ok_or_else(|| BusError::UnknownGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                })
        })
    }

    fn range<'a>(
        &'a self,
        stream: &'a str,
        after_seq: u64,
        count: usize,
    ) -> BoxFuture<'a, BusResult<Vec<BusEntry>>> {
        Box::pin(async move {
            self.check_available()?;
            let Some(log) = self.existing(stream) else {
                return Ok(Vec::new());
            };
            let log = log.lock();
            let start = log.first_after(after_seq);
            Ok(log.entries.iter().skip(start).take(count).cloned().collect())
        })
    }

    fn len<'a>(&'a self, stream: &'a str) -> BoxFuture<'a, BusResult<usize>> {
        Box::pin(async move {
            Ok(self
                .existing(stream)
                .map_or(0, |log| log.lock().entries.len()))
        })
    }
}
