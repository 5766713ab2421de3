//! `/metrics` and `/health` endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tickflow_bus::BusProducer;
use tickflow_decision::{DecisionEngine, EngineStatsSnapshot};
use tickflow_inference::{BreakerSnapshot, InferenceOrchestrator};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppResult;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct ServerState {
    signal_producer: Arc<BusProducer>,
    engine: Arc<DecisionEngine>,
    inference: Arc<InferenceOrchestrator>,
}

impl ServerState {
    pub fn new(
        signal_producer: Arc<BusProducer>,
        engine: Arc<DecisionEngine>,
        inference: Arc<InferenceOrchestrator>,
    ) -> Self {
        Self {
            signal_producer,
            engine,
            inference,
        }
    }

    pub fn health(&self) -> HealthReport {
        let order_producer = self.engine.publisher().producer();
        let bus = BusHealth {
            signal_producer_healthy: self.signal_producer.is_healthy(),
            order_producer_healthy: order_producer.is_healthy(),
            signals_buffered: self.signal_producer.buffered_len(),
            orders_buffered: order_producer.buffered_len(),
        };
        let healthy = bus.signal_producer_healthy && bus.order_producer_healthy;
        HealthReport {
            status: if healthy { "ok" } else { "unhealthy" },
            bus,
            inference: self.inference.snapshot(),
            engine: self.engine.stats().snapshot(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BusHealth {
    pub signal_producer_healthy: bool,
    pub order_producer_healthy: bool,
    pub signals_buffered: usize,
    pub orders_buffered: usize,
}

/// Body of `/health`. Only bus unreachability makes the process unhealthy;
/// open inference circuits are reported but do not fail the check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub bus: BusHealth,
    pub inference: Vec<BreakerSnapshot>,
    pub engine: EngineStatsSnapshot,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    shutdown: CancellationToken,
) -> AppResult<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "Metrics server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Metrics server stopped");
    Ok(())
}

pub async fn bind(addr: SocketAddr) -> AppResult<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

async fn metrics_handler() -> Response {
    match tickflow_telemetry::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_handler(State(state): State<ServerState>) -> Response {
    let report = state.health();
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}
