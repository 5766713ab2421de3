//! Stream bus abstraction.
//!
//! A trait seam so the pipeline can run against the in-process
//! [`MemoryBus`](crate::MemoryBus) or an external log service.

use std::pin::Pin;
use std::time::Duration;

use crate::entry::{BusEntry, Delivery};
use crate::error::BusResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Append-only streams with consumer groups.
pub trait StreamBus: Send + Sync {
    /// Append a payload. Assigns id, timestamp and sequence.
    fn append<'a>(
        &'a self,
        stream: &'a str,
        correlation_id: &'a str,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, BusResult<BusEntry>>;

    /// Create a consumer group if missing. New groups start at the beginning
    /// of the stream.
    fn ensure_group<'a>(&'a self, stream: &'a str, group: &'a str)
        -> BoxFuture<'a, BusResult<()>>;

    /// Claim up to `count` entries for `consumer`: expired leases first, then
    /// new entries. Waits up to `block` when nothing is available.
    fn read_group<'a>(
        &'a self,
        stream: &'a str,
        group: &'a str,
        consumer: &'a str,
        count: usize,
        block: Duration,
    ) -> BoxFuture<'a, BusResult<Vec<Delivery>>>;

    /// Acknowledge an entry. `Ok(false)` if it was no longer pending.
    /// Fails with `LeaseExpired` if another consumer now owns it.
    fn ack<'a>(
        &'a self,
        stream: &'a str,
        group: &'a str,
        consumer: &'a str,
        entry_id: &'a str,
    ) -> BoxFuture<'a, BusResult<bool>>;

    /// Delivered but un-acked entries in a group.
    fn pending<'a>(&'a self, stream: &'a str, group: &'a str) -> BoxFuture<'a, BusResult<usize>>;

    /// Entries with `seq > after_seq`, oldest first, at most `count`.
    fn range<'a>(
        &'a self,
        stream: &'a str,
        after_seq: u64,
        count: usize,
    ) -> BoxFuture<'a, BusResult<Vec<BusEntry>>>;

    /// Retained entries in a stream.
    fn len<'a>(&'a self, stream: &'a str) -> BoxFuture<'a, BusResult<usize>>;
}
