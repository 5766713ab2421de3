//! Decision worker: one consumer of the signal group.
//!
//! Each delivery is processed under `min(lease deadline, processing budget)`.
//! Completed work is acked; work cut off at the deadline, or failing with an
//! error, is left pending so the lease expires and the entry is redelivered.
//! Malformed entries are acked and dropped.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tickflow_bus::{BusConfig, BusError, Delivery, StreamBus};
use tickflow_core::Signal;
use tickflow_telemetry::Metrics;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{DecisionEngine, ProcessOutcome};
use crate::error::DecisionResult;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    Acked(ProcessOutcome),
    Malformed,
    /// Deadline reached; left pending for redelivery.
    Abandoned,
    /// Processing error; left pending for redelivery.
    Failed,
}

pub struct DecisionWorker {
    name: String,
    bus: Arc<dyn StreamBus>,
    engine: Arc<DecisionEngine>,
    stream: String,
    group: String,
    batch: usize,
    block: Duration,
    budget: Duration,
}

impl DecisionWorker {
    pub fn new(
        name: impl Into<String>,
        bus: Arc<dyn StreamBus>,
        engine: Arc<DecisionEngine>,
        bus_config: &BusConfig,
    ) -> Self {
        let config = engine.config();
        Self {
            name: name.into(),
            stream: config.source_stream.clone(),
            group: config.consumer_group.clone(),
            budget: config.processing_budget(),
            batch: bus_config.read_batch,
            block: Duration::from_millis(bus_config.read_block_ms),
            bus,
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consume until `shutdown` is cancelled. Deliveries not yet handled at
    /// shutdown stay pending and are redelivered to another consumer.
    pub async fn run(self, shutdown: CancellationToken) -> DecisionResult<()> {
        self.bus.ensure_group(&self.stream, &self.group).await?;
        info!(
            worker = %self.name,
            stream = %self.stream,
            group = %self.group,
            "Decision worker started"
        );

        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = self.bus.read_group(&self.stream, &self.group, &self.name, self.batch, self.block) => r,
            };

            match read {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        self.handle(delivery).await;
                    }
                }
                Err(e) => {
                    warn!(worker = %self.name, error = %e, "Signal read failed");
                    tokio::time::sleep(self.block).await;
                }
            }

            if let Ok(pending) = self.bus.pending(&self.stream, &self.group).await {
                Metrics::consumer_pending(&self.stream, &self.group, pending);
            }
        }

        info!(worker = %self.name, "Decision worker stopped");
        Ok(())
    }

    pub async fn handle(&self, delivery: Delivery) -> HandleOutcome {
        let signal: Signal = match delivery.entry.decode() {
            Ok(signal) => signal,
            Err(e) => {
                warn!(
                    worker = %self.name,
                    entry_id = %delivery.entry.id,
                    error = %e,
                    "Malformed signal entry, dropping"
                );
                Metrics::signal_discarded("malformed");
                self.ack(&delivery).await;
                return HandleOutcome::Malformed;
            }
        };

        if delivery.is_redelivery() {
            info!(
                worker = %self.name,
                signal_id = %signal.id,
                delivery_count = delivery.delivery_count,
                "Processing redelivered signal"
            );
        }

        let deadline = (Instant::now() + self.budget).min(delivery.lease_deadline);
        let processed = tokio::time::timeout_at(
            deadline,
            self.engine.process(&signal, &delivery.entry.correlation_id),
        )
        .await;

        match processed {
            Ok(Ok(outcome)) => {
                if let ProcessOutcome::Published { .. } = &outcome {
                    let latency_ms = (Utc::now() - delivery.entry.ts).num_milliseconds().max(0);
                    Metrics::signal_to_order_latency(latency_ms as f64);
                }
                self.ack(&delivery).await;
                HandleOutcome::Acked(outcome)
            }
            Ok(Err(e)) => {
                error!(
                    worker = %self.name,
                    signal_id = %signal.id,
                    error = %e,
                    "Signal processing failed, leaving for redelivery"
                );
                HandleOutcome::Failed
            }
            Err(_) => {
                self.engine.stats().record_abandoned();
                warn!(
                    worker = %self.name,
                    signal_id = %signal.id,
                    budget_ms = self.budget.as_millis() as u64,
                    "Signal processing abandoned at deadline"
                );
                HandleOutcome::Abandoned
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        match self
            .bus
            .ack(&self.stream, &self.group, &self.name, &delivery.entry.id)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(entry_id = %delivery.entry.id, "Entry already acked"),
            Err(BusError::LeaseExpired { .. }) => {
                warn!(
                    worker = %self.name,
                    entry_id = %delivery.entry.id,
                    "Lease lost before ack; another consumer owns the entry"
                );
            }
            Err(e) => warn!(worker = %self.name, error = %e, "Ack failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecisionConfig;
    use crate::engine::tests::{orchestrator, producer, signal};
    use crate::publisher::OrderPublisher;
    use crate::sentiment::SentimentCache;
    use serde_json::json;
    use tickflow_bus::{MemoryBus, GLOBAL_SIGNAL_STREAM, ORDER_STREAM};
    use tickflow_inference::InferenceOrchestrator;

    const GROUP: &str = "decision";

    fn engine_with(
        bus: &Arc<MemoryBus>,
        inference: Arc<InferenceOrchestrator>,
        config: DecisionConfig,
    ) -> Arc<DecisionEngine> {
        Arc::new(DecisionEngine::new(
            config,
            5,
            inference,
            Arc::new(SentimentCache::new(chrono::Duration::seconds(300))),
            OrderPublisher::new(producer(bus)),
        ))
    }

    fn worker(name: &str, bus: &Arc<MemoryBus>, engine: Arc<DecisionEngine>) -> DecisionWorker {
        DecisionWorker::new(name, bus.clone(), engine, &BusConfig::default())
    }

    async fn append_signal(bus: &MemoryBus, score: f64) {
        let payload = serde_json::to_value(signal(1, score, 105.0)).unwrap();
        bus.append(GLOBAL_SIGNAL_STREAM, "corr", payload).await.unwrap();
    }

    async fn claim(bus: &MemoryBus, consumer: &str) -> Vec<Delivery> {
        bus.read_group(GLOBAL_SIGNAL_STREAM, GROUP, consumer, 10, Duration::ZERO)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_acks_published_signal() {
        let bus = Arc::new(MemoryBus::new(&BusConfig::default()));
        bus.ensure_group(GLOBAL_SIGNAL_STREAM, GROUP).await.unwrap();
        append_signal(&bus, 0.9).await;

        let engine = engine_with(&bus, orchestrator(Some(0.8), 5), DecisionConfig::default());
        let w = worker("w1", &bus, engine);
        let mut deliveries = claim(&bus, "w1").await;
        let outcome = w.handle(deliveries.remove(0)).await;

        assert!(matches!(
            outcome,
            HandleOutcome::Acked(ProcessOutcome::Published { .. })
        ));
        assert_eq!(bus.pending(GLOBAL_SIGNAL_STREAM, GROUP).await.unwrap(), 0);
        assert_eq!(bus.len(ORDER_STREAM).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_entry_acked() {
        let bus = Arc::new(MemoryBus::new(&BusConfig::default()));
        bus.ensure_group(GLOBAL_SIGNAL_STREAM, GROUP).await.unwrap();
        bus.append(GLOBAL_SIGNAL_STREAM, "corr", json!({"not": "a signal"}))
            .await
            .unwrap();

        let engine = engine_with(&bus, orchestrator(Some(0.8), 5), DecisionConfig::default());
        let w = worker("w1", &bus, engine);
        let mut deliveries = claim(&bus, "w1").await;
        assert_eq!(w.handle(deliveries.remove(0)).await, HandleOutcome::Malformed);
        assert_eq!(bus.pending(GLOBAL_SIGNAL_STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_budget_left_pending_then_redelivered() {
        let bus = Arc::new(MemoryBus::new(&BusConfig::default()));
        bus.ensure_group(GLOBAL_SIGNAL_STREAM, GROUP).await.unwrap();
        append_signal(&bus, 0.9).await;

        let slow = DecisionConfig {
            processing_budget_ms: 50,
            ..Default::default()
        };
        let engine = engine_with(&bus, orchestrator(Some(0.8), 150), slow);
        let w1 = worker("w1", &bus, engine);
        let mut deliveries = claim(&bus, "w1").await;
        assert_eq!(w1.handle(deliveries.remove(0)).await, HandleOutcome::Abandoned);
        assert_eq!(bus.pending(GLOBAL_SIGNAL_STREAM, GROUP).await.unwrap(), 1);
        assert_eq!(bus.len(ORDER_STREAM).await.unwrap(), 0);

        // After the lease expires a healthy worker picks it up
        tokio::time::advance(Duration::from_millis(BusConfig::default().lease_timeout_ms)).await;
        let engine = engine_with(&bus, orchestrator(Some(0.8), 5), DecisionConfig::default());
        let w2 = worker("w2", &bus, engine);
        let mut again = claim(&bus, "w2").await;
        assert_eq!(again.len(), 1);
        assert!(again[0].is_redelivery());
        let outcome = w2.handle(again.remove(0)).await;
        assert!(matches!(outcome, HandleOutcome::Acked(_)));
        assert_eq!(bus.pending(GLOBAL_SIGNAL_STREAM, GROUP).await.unwrap(), 0);
        assert_eq!(bus.len(ORDER_STREAM).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_before_ack_publishes_once() {
        let bus = Arc::new(MemoryBus::new(&BusConfig::default()));
        bus.ensure_group(GLOBAL_SIGNAL_STREAM, GROUP).await.unwrap();
        append_signal(&bus, 0.9).await;

        let engine = engine_with(&bus, orchestrator(Some(0.8), 5), DecisionConfig::default());
        let w1 = worker("w1", &bus, engine.clone());
        let w2 = worker("w2", &bus, engine);

        // w1 publishes but dies before acking
        let first = claim(&bus, "w1").await;
        let s: Signal = first[0].entry.decode().unwrap();
        w1.engine.process(&s, "corr").await.unwrap();

        tokio::time::advance(Duration::from_millis(BusConfig::default().lease_timeout_ms)).await;
        let mut again = claim(&bus, "w2").await;
        assert_eq!(again[0].delivery_count, 2);
        assert_eq!(
            w2.handle(again.remove(0)).await,
            HandleOutcome::Acked(ProcessOutcome::Duplicate)
        );
        assert_eq!(bus.len(ORDER_STREAM).await.unwrap(), 1);

        // The stale consumer's late ack is refused
        assert!(matches!(
            bus.ack(GLOBAL_SIGNAL_STREAM, GROUP, "w1", &first[0].entry.id).await,
            Ok(false) | Err(BusError::LeaseExpired { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_consumes_until_shutdown() {
        let bus = Arc::new(MemoryBus::new(&BusConfig::default()));
        let engine = engine_with(&bus, orchestrator(Some(0.8), 5), DecisionConfig::default());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker("w1", &bus, engine.clone()).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        append_signal(&bus, 0.9).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(engine.stats().snapshot().published, 1);
        assert_eq!(bus.pending(GLOBAL_SIGNAL_STREAM, GROUP).await.unwrap(), 0);
    }
}
