//! Order bus publisher.

use std::sync::Arc;
use tickflow_bus::{BusProducer, PublishOutcome, ORDER_STREAM};
use tickflow_core::OrderDecision;
use tickflow_telemetry::Metrics;
use tracing::{info, warn};

use crate::error::DecisionResult;

/// Appends order decisions to the order stream, deduplicating on the order
/// id so a redelivered signal cannot produce a second entry.
pub struct OrderPublisher {
    producer: Arc<BusProducer>,
    stream: String,
}

impl OrderPublisher {
    pub fn new(producer: Arc<BusProducer>) -> Self {
        Self::with_stream(producer, ORDER_STREAM)
    }

    pub fn with_stream(producer: Arc<BusProducer>, stream: impl Into<String>) -> Self {
        Self {
            producer,
            stream: stream.into(),
        }
    }

    pub fn producer(&self) -> &Arc<BusProducer> {
        &self.producer
    }

    pub async fn publish(
        &self,
        decision: &OrderDecision,
        correlation_id: &str,
    ) -> DecisionResult<PublishOutcome> {
        let payload = serde_json::to_value(decision)?;
        let outcome = self
            .producer
            .publish(&self.stream, correlation_id, Some(decision.id.as_str()), payload)
            .await?;

        match &outcome {
            PublishOutcome::Appended(entry) => {
                Metrics::order_published(decision.symbol.as_str(), decision.side.as_str());
                info!(
                    order_id = %decision.id,
                    signal_id = %decision.signal_id,
                    symbol = %decision.symbol,
                    side = %decision.side,
                    quantity = %decision.quantity,
                    entry_id = %entry.id,
                    "Order decision published"
                );
            }
            PublishOutcome::Buffered => {
                Metrics::order_published(decision.symbol.as_str(), decision.side.as_str());
                warn!(order_id = %decision.id, "Order decision buffered locally");
            }
            PublishOutcome::Duplicate => {
                info!(order_id = %decision.id, "Order decision already published");
            }
        }
        Ok(outcome)
    }
}
