//! Signal and order buses for tickflow.
//!
//! Append-only ordered streams with consumer-group semantics:
//! - each group member receives a disjoint subset of entries
//! - delivered entries stay pending until acked; expired leases are
//!   redelivered (at-least-once)
//! - producers retry with bounded backoff, then buffer locally and alert
//! - consumers and producers dedupe on payload ids with a bounded set

pub mod config;
pub mod dedup;
pub mod entry;
pub mod error;
pub mod memory;
pub mod producer;
pub mod stream;

pub use config::BusConfig;
pub use dedup::RecentIds;
pub use entry::{
    signal_stream, BusEntry, Delivery, GLOBAL_SIGNAL_STREAM, ORDER_STREAM, SIGNAL_STREAM_PREFIX,
};
pub use error::{BusError, BusResult};
pub use memory::MemoryBus;
pub use producer::{BusProducer, PublishOutcome};
pub use stream::{BoxFuture, StreamBus};
