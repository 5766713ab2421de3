//! Stream entries and deliveries.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tickflow_core::Symbol;
use tokio::time::Instant;

use crate::error::BusResult;

pub const SIGNAL_STREAM_PREFIX: &str = "signals:";
pub const GLOBAL_SIGNAL_STREAM: &str = "signals:global";
pub const ORDER_STREAM: &str = "orders:gateway";

/// Per-symbol signal stream name, e.g. `signals:AAPL`.
pub fn signal_stream(symbol: &Symbol) -> String {
    format!("{SIGNAL_STREAM_PREFIX}{symbol}")
}

/// One appended record.
///
/// `seq` is strictly increasing within a stream; `id` is `{ts_ms}-{seq}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEntry {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub seq: u64,
    pub correlation_id: String,
    pub payload: serde_json::Value,
}

impl BusEntry {
    pub fn decode<T: DeserializeOwned>(&self) -> BusResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// An entry handed to one consumer of a group under a lease.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub entry: BusEntry,
    /// 1 on first delivery.
    pub delivery_count: u32,
    /// After this instant the entry may be handed to another consumer.
    pub lease_deadline: Instant,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    pub fn lease_expired(&self) -> bool {
        Instant::now() >= self.lease_deadline
    }
}
