//! Main application logic.
//!
//! Wires the pipeline: tick router → symbol workers (state + detector) →
//! signal bus → decision worker pool → order bus, plus the sentiment
//! refresher, periodic summaries, buffered-write flushing and the metrics
//! server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tickflow_bus::{BusProducer, MemoryBus, StreamBus};
use tickflow_core::Symbol;
use tickflow_decision::{
    DecisionEngine, DecisionWorker, HttpSentimentClient, OrderPublisher, SentimentCache,
    SentimentSource,
};
use tickflow_detector::SignalDetector;
use tickflow_feed::{PartitionPlan, ReplayStats, TickReader};
use tickflow_inference::InferenceOrchestrator;
use tickflow_telemetry::StatsReporter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AppConfig, WorkersConfig};
use crate::error::{AppError, AppResult};
use crate::server::{self, ServerState};
use crate::symbol_worker::{SymbolWorker, TickRouter, WorkerSummary};

/// Main application.
pub struct Application {
    config: AppConfig,
    bus: Arc<MemoryBus>,
    signal_producer: Arc<BusProducer>,
    inference: Arc<InferenceOrchestrator>,
    sentiment: Arc<SentimentCache>,
    sentiment_source: Option<Arc<dyn SentimentSource>>,
    engine: Arc<DecisionEngine>,
}

impl Application {
    /// Create an application with HTTP inference backends and, when enabled,
    /// the HTTP sentiment client.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let inference = Arc::new(InferenceOrchestrator::from_config(&config.inference)?);
        let sentiment_source: Option<Arc<dyn SentimentSource>> = if config.sentiment.enabled {
            Some(Arc::new(HttpSentimentClient::new(
                &config.sentiment.base_url,
                config.sentiment.http_timeout(),
            )?))
        } else {
            None
        };
        Self::with_collaborators(config, inference, sentiment_source)
    }

    /// Create an application around existing inference and sentiment
    /// collaborators.
    pub fn with_collaborators(
        config: AppConfig,
        inference: Arc<InferenceOrchestrator>,
        sentiment_source: Option<Arc<dyn SentimentSource>>,
    ) -> AppResult<Self> {
        config.validate()?;

        let bus = Arc::new(MemoryBus::new(&config.bus));
        let signal_producer = Arc::new(BusProducer::new(
            bus.clone(),
            config.bus.clone(),
            "signal",
        ));
        let order_producer = Arc::new(BusProducer::new(bus.clone(), config.bus.clone(), "order"));
        let sentiment = Arc::new(SentimentCache::from_config(&config.sentiment));
        let engine = Arc::new(DecisionEngine::new(
            config.decision.clone(),
            config.inference.horizon,
            inference.clone(),
            sentiment.clone(),
            OrderPublisher::new(order_producer),
        ));

        Ok(Self {
            config,
            bus,
            signal_producer,
            inference,
            sentiment,
            sentiment_source,
            engine,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MemoryBus> {
        &self.bus
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.signal_producer.clone(),
            self.engine.clone(),
            self.inference.clone(),
        )
    }

    /// Spawn symbol workers, decision workers and background tasks.
    pub fn start(&self) -> AppResult<Pipeline> {
        let shutdown = CancellationToken::new();
        let workers = &self.config.workers;
        let plan = partition_plan(workers)?;

        let mut senders = Vec::with_capacity(workers.symbol_workers);
        let mut symbol_workers = Vec::with_capacity(workers.symbol_workers);
        for id in 0..workers.symbol_workers {
            let (tx, rx) = mpsc::channel(workers.channel_capacity);
            let worker = SymbolWorker::new(
                id,
                self.config.state.clone(),
                SignalDetector::new(self.config.detector.clone()),
                self.signal_producer.clone(),
                rx,
            );
            senders.push(tx);
            symbol_workers.push(tokio::spawn(worker.run(shutdown.clone())));
        }
        let router = TickRouter::new(plan, senders);

        let mut background = Vec::new();
        let bus: Arc<dyn StreamBus> = self.bus.clone();
        for i in 0..workers.decision_workers {
            let worker = DecisionWorker::new(
                format!("decision-{i}"),
                bus.clone(),
                self.engine.clone(),
                &self.config.bus,
            );
            let token = shutdown.clone();
            background.push(tokio::spawn(async move {
                let name = worker.name().to_string();
                if let Err(e) = worker.run(token).await {
                    error!(worker = %name, error = %e, "Decision worker exited with error");
                }
            }));
        }

        if let Some(source) = &self.sentiment_source {
            background.push(tokio::spawn(self.sentiment.clone().run_refresher(
                source.clone(),
                self.config.sentiment.refresh_interval(),
                shutdown.clone(),
            )));
        }

        let stats_interval = Duration::from_secs(self.config.telemetry.stats_interval_secs);
        background.push(tokio::spawn(
            StatsReporter::new().run(stats_interval, shutdown.clone()),
        ));
        background.push(tokio::spawn(maintenance_loop(
            self.signal_producer.clone(),
            self.engine.clone(),
            Duration::from_millis(self.config.bus.max_delay_ms.max(1)),
            stats_interval,
            shutdown.clone(),
        )));

        info!(
            symbol_workers = workers.symbol_workers,
            decision_workers = workers.decision_workers,
            sentiment = self.sentiment_source.is_some(),
            "Pipeline started"
        );

        Ok(Pipeline {
            router: Some(router),
            symbol_workers,
            background,
            shutdown,
        })
    }

    /// Run until Ctrl+C.
    pub async fn run(self) -> AppResult<()> {
        info!("Starting application");
        self.inference.check_health().await;

        let mut pipeline = self.start()?;

        if self.config.telemetry.metrics_enabled {
            let addr: SocketAddr = format!(
                "{}:{}",
                self.config.telemetry.bind_address, self.config.telemetry.metrics_port
            )
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid metrics address: {e}")))?;
            let listener = server::bind(addr).await?;
            let state = self.server_state();
            let token = pipeline.shutdown_token();
            pipeline.background.push(tokio::spawn(async move {
                if let Err(e) = server::serve(listener, state, token).await {
                    error!(error = %e, "Metrics server error");
                }
            }));
        }

        if let Some(path) = self.config.replay.path.clone() {
            let router = pipeline.router()?.clone();
            tokio::select! {
                result = replay_file(&router, Path::new(&path)) => {
                    if let Err(e) = result {
                        error!(path = %path, error = %e, "Replay failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C during replay, shutting down");
                    pipeline.shutdown().await;
                    return Ok(());
                }
            }
        }

        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
        pipeline.shutdown().await;
        self.engine.stats().log_summary();
        Ok(())
    }
}

/// Running pipeline tasks.
pub struct Pipeline {
    router: Option<TickRouter>,
    symbol_workers: Vec<JoinHandle<WorkerSummary>>,
    background: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Tick input. Fails once input has been closed.
    pub fn router(&self) -> AppResult<&TickRouter> {
        self.router.as_ref().ok_or(AppError::Shutdown)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Close tick input and wait for symbol workers to finish queued ticks.
    /// Decision workers keep running.
    pub async fn close_input(&mut self) -> WorkerSummary {
        self.router = None;
        let mut total = WorkerSummary::default();
        for handle in self.symbol_workers.drain(..) {
            match handle.await {
                Ok(summary) => {
                    total.ticks += summary.ticks;
                    total.rejected += summary.rejected;
                    total.signals += summary.signals;
                    total.publish_failures += summary.publish_failures;
                }
                Err(e) => warn!(error = %e, "Symbol worker task failed"),
            }
        }
        total
    }

    /// Stop every task. Un-acked signals stay pending on the bus.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        let summary = self.close_input().await;
        for handle in self.background.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task failed");
            }
        }
        info!(
            ticks = summary.ticks,
            rejected = summary.rejected,
            signals = summary.signals,
            "Pipeline stopped"
        );
    }
}

/// Feed a CSV replay file through the router in file order.
pub async fn replay_file(router: &TickRouter, path: &Path) -> AppResult<ReplayStats> {
    info!(path = %path.display(), "Replaying ticks");
    let mut reader = TickReader::open(path)?;
    for tick in reader.by_ref() {
        router.route(tick?).await?;
    }
    let stats = reader.stats();
    info!(
        lines = stats.lines,
        ticks = stats.ticks,
        malformed = stats.malformed,
        "Replay finished"
    );
    Ok(stats)
}

/// Hash routing, or weighted bin-packing when hot symbols are configured.
pub fn partition_plan(workers: &WorkersConfig) -> AppResult<PartitionPlan> {
    if workers.hot_symbols.is_empty() {
        return Ok(PartitionPlan::hashed(workers.symbol_workers));
    }

    let mut weights = HashMap::new();
    let mut hot = Vec::with_capacity(workers.hot_symbols.len());
    for (name, weight) in &workers.hot_symbols {
        let symbol = Symbol::new(name)?;
        weights.insert(symbol.clone(), *weight);
        hot.push(symbol);
    }
    Ok(PartitionPlan::weighted(
        &hot,
        &weights,
        &hot,
        workers.symbol_workers,
    ))
}

/// Retry buffered bus writes and log the engine summary.
async fn maintenance_loop(
    signal_producer: Arc<BusProducer>,
    engine: Arc<DecisionEngine>,
    flush_interval: Duration,
    summary_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut flush_ticker = tokio::time::interval(flush_interval);
    let mut summary_ticker = tokio::time::interval(summary_interval);
    summary_ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = flush_ticker.tick() => {
                for producer in [&signal_producer, engine.publisher().producer()] {
                    if producer.buffered_len() > 0 {
                        let flushed = producer.flush().await;
                        if flushed > 0 {
                            info!(flushed, remaining = producer.buffered_len(), "Flushed buffered bus writes");
                        }
                    }
                }
            }
            _ = summary_ticker.tick() => engine.stats().log_summary(),
        }
    }
}
