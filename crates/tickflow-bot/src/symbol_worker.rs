//! Symbol workers and tick routing.
//!
//! Each worker exclusively owns the state of the symbols routed to it and
//! runs the detector inline, so ticks of one symbol are processed in arrival
//! order without locks. Emitted signals go to the symbol's stream and the
//! global stream under one correlation id.

use std::sync::Arc;
use tickflow_bus::{signal_stream, BusProducer, PublishOutcome, GLOBAL_SIGNAL_STREAM};
use tickflow_core::{Signal, Symbol, Tick};
use tickflow_detector::SignalDetector;
use tickflow_feed::{PartitionPlan, StateArena, StateConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Input to a symbol worker.
#[derive(Debug, Clone)]
pub enum WorkerInput {
    Tick(Tick),
    /// Session boundary for one symbol, or for every symbol when `None`.
    SessionBoundary(Option<Symbol>),
}

/// Counters returned when a worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub ticks: u64,
    pub rejected: u64,
    pub signals: u64,
    pub publish_failures: u64,
}

pub struct SymbolWorker {
    id: usize,
    arena: StateArena,
    detector: SignalDetector,
    producer: Arc<BusProducer>,
    rx: mpsc::Receiver<WorkerInput>,
    summary: WorkerSummary,
}

impl SymbolWorker {
    pub fn new(
        id: usize,
        state_config: StateConfig,
        detector: SignalDetector,
        producer: Arc<BusProducer>,
        rx: mpsc::Receiver<WorkerInput>,
    ) -> Self {
        Self {
            id,
            arena: StateArena::new(state_config),
            detector,
            producer,
            rx,
            summary: WorkerSummary::default(),
        }
    }

    /// Process inputs until the channel closes or `shutdown` is cancelled.
    /// Inputs already queued when the channel closes are still processed.
    pub async fn run(mut self, shutdown: CancellationToken) -> WorkerSummary {
        info!(worker = self.id, "Symbol worker started");
        loop {
            let input = tokio::select! {
                _ = shutdown.cancelled() => break,
                input = self.rx.recv() => input,
            };
            match input {
                Some(WorkerInput::Tick(tick)) => self.on_tick(tick).await,
                Some(WorkerInput::SessionBoundary(Some(symbol))) => {
                    self.arena.reset_session(&symbol);
                    debug!(worker = self.id, symbol = %symbol, "Session reset");
                }
                Some(WorkerInput::SessionBoundary(None)) => {
                    self.arena.reset_all_sessions();
                    debug!(worker = self.id, symbols = self.arena.len(), "All sessions reset");
                }
                None => break,
            }
        }

        if self.producer.buffered_len() > 0 {
            let flushed = self.producer.flush().await;
            let remaining = self.producer.buffered_len();
            if remaining > 0 {
                warn!(worker = self.id, flushed, remaining, "Signals still buffered at stop");
            }
        }
        info!(
            worker = self.id,
            symbols = self.arena.len(),
            ticks = self.summary.ticks,
            rejected = self.summary.rejected,
            signals = self.summary.signals,
            "Symbol worker stopped"
        );
        self.summary
    }

    async fn on_tick(&mut self, tick: Tick) {
        self.summary.ticks += 1;
        let state = match self.arena.apply(&tick) {
            Ok(state) => state,
            Err(_) => {
                // Logged and counted by the arena
                self.summary.rejected += 1;
                return;
            }
        };

        let Some(signal) = self.detector.detect(state) else {
            return;
        };
        self.summary.signals += 1;
        if let Err(e) = publish_signal(&self.producer, &signal).await {
            self.summary.publish_failures += 1;
            error!(
                worker = self.id,
                signal_id = %signal.id,
                error = %e,
                "Signal publish failed"
            );
        }
    }
}

/// Append a signal to its per-symbol stream and the global stream.
pub async fn publish_signal(producer: &BusProducer, signal: &Signal) -> AppResult<Uuid> {
    let correlation_id = Uuid::new_v4();
    let correlation = correlation_id.to_string();
    let payload = serde_json::to_value(signal)?;

    for stream in [signal_stream(&signal.symbol), GLOBAL_SIGNAL_STREAM.to_string()] {
        let key = format!("{stream}/{}", signal.id);
        match producer
            .publish(&stream, &correlation, Some(&key), payload.clone())
            .await?
        {
            PublishOutcome::Appended(entry) => debug!(
                signal_id = %signal.id,
                stream = %stream,
                seq = entry.seq,
                correlation_id = %correlation,
                "Signal appended"
            ),
            PublishOutcome::Buffered => warn!(
                signal_id = %signal.id,
                stream = %stream,
                "Signal buffered locally"
            ),
            PublishOutcome::Duplicate => debug!(
                signal_id = %signal.id,
                stream = %stream,
                "Signal already published"
            ),
        }
    }
    Ok(correlation_id)
}

/// Routes ticks to the worker that owns their symbol.
#[derive(Clone)]
pub struct TickRouter {
    plan: Arc<PartitionPlan>,
    senders: Vec<mpsc::Sender<WorkerInput>>,
}

impl TickRouter {
    pub fn new(plan: PartitionPlan, senders: Vec<mpsc::Sender<WorkerInput>>) -> Self {
        Self {
            plan: Arc::new(plan),
            senders,
        }
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    pub fn worker_for(&self, symbol: &Symbol) -> usize {
        self.plan.worker_for(symbol) % self.senders.len().max(1)
    }

    /// Waits while the owning worker's queue is full.
    pub async fn route(&self, tick: Tick) -> AppResult<()> {
        let sender = self.sender_for(&tick.symbol)?;
        sender
            .send(WorkerInput::Tick(tick))
            .await
            .map_err(|_| AppError::Shutdown)
    }

    pub async fn session_boundary(&self, symbol: Option<Symbol>) -> AppResult<()> {
        match symbol {
            Some(symbol) => {
                let sender = self.sender_for(&symbol)?;
                sender
                    .send(WorkerInput::SessionBoundary(Some(symbol)))
                    .await
                    .map_err(|_| AppError::Shutdown)
            }
            None => {
                for sender in &self.senders {
                    sender
                        .send(WorkerInput::SessionBoundary(None))
                        .await
                        .map_err(|_| AppError::Shutdown)?;
                }
                Ok(())
            }
        }
    }

    fn sender_for(&self, symbol: &Symbol) -> AppResult<&mpsc::Sender<WorkerInput>> {
        self.senders
            .get(self.worker_for(symbol))
            .ok_or_else(|| AppError::Config("no symbol workers configured".to_string()))
    }
}
