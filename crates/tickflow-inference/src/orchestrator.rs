//! Backend race with cancellation and circuit breaking.
//!
//! Every admitted backend is called concurrently under one hard deadline. The
//! first success wins; the remaining calls are cancelled through a shared
//! token, which drops their in-flight futures. Failures and timeouts feed
//! each backend's breaker, cancellations do not. Dropping `predict` mid-race
//! aborts the calls and releases any half-open probe they held.

use std::sync::Arc;
use std::time::Duration;
use tickflow_core::{BackendKind, InferenceRequest, InferenceResult};
use tickflow_telemetry::Metrics;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::InferenceBackend;
use crate::breaker::{Admission, BreakerSnapshot, CircuitBreaker};
use crate::config::InferenceConfig;
use crate::error::{InferResult, InferenceError};
use crate::http::HttpBackend;

struct Lane {
    backend: Arc<dyn InferenceBackend>,
    breaker: Arc<CircuitBreaker>,
}

enum LaneOutcome {
    Success(InferenceResult),
    Failed(InferenceError),
    Cancelled,
}

pub struct InferenceOrchestrator {
    lanes: Vec<Lane>,
    deadline: Duration,
}

impl InferenceOrchestrator {
    /// `primary` is the latency-optimized backend, `fallback` the reliable
    /// one. Each gets its own breaker.
    pub fn new(
        primary: Arc<dyn InferenceBackend>,
        fallback: Arc<dyn InferenceBackend>,
        config: &InferenceConfig,
    ) -> Self {
        let lanes = [primary, fallback]
            .into_iter()
            .map(|backend| Lane {
                breaker: Arc::new(CircuitBreaker::new(
                    backend.kind(),
                    config.failure_threshold,
                    config.success_threshold,
                    config.cooldown(),
                )),
                backend,
            })
            .collect();

        Self {
            lanes,
            deadline: config.deadline(),
        }
    }

    /// GPU and CPU HTTP backends at the configured URLs.
    pub fn from_config(config: &InferenceConfig) -> InferResult<Self> {
        config.validate().map_err(InferenceError::InvalidConfig)?;
        let gpu = HttpBackend::new(BackendKind::Gpu, &config.gpu_url, config.http_timeout())?;
        let cpu = HttpBackend::new(BackendKind::Cpu, &config.cpu_url, config.http_timeout())?;
        Ok(Self::new(Arc::new(gpu), Arc::new(cpu), config))
    }

    pub fn breaker(&self, kind: BackendKind) -> Option<&CircuitBreaker> {
        self.lanes
            .iter()
            .find(|lane| lane.backend.kind() == kind)
            .map(|lane| lane.breaker.as_ref())
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        self.lanes.iter().map(|lane| lane.breaker.snapshot()).collect()
    }

    /// Probe every backend once and log the result. Never fails.
    pub async fn check_health(&self) {
        for lane in &self.lanes {
            match lane.backend.health_check().await {
                Ok(()) => info!(backend = %lane.backend.kind(), "Inference backend healthy"),
                Err(e) => warn!(backend = %lane.backend.kind(), error = %e, "Inference backend unhealthy"),
            }
        }
    }

    /// Race the admitted backends and return the first success.
    ///
    /// Returns [`InferenceError::Unavailable`] when every admitted backend
    /// fails or misses the deadline, or when every circuit is open.
    pub async fn predict(&self, request: InferenceRequest) -> InferResult<InferenceResult> {
        let deadline = Instant::now() + self.deadline;
        let deadline_ms = self.deadline.as_millis() as u64;
        let cancel = CancellationToken::new();
        let request = Arc::new(request);
        let mut calls = JoinSet::new();

        for lane in &self.lanes {
            let kind = lane.backend.kind();
            let admission = lane.breaker.try_acquire();
            if admission == Admission::Rejected {
                info!(backend = %kind, symbol = %request.symbol, "Circuit open, skipping backend");
                continue;
            }

            let backend = lane.backend.clone();
            let guard = lane.breaker.admit(admission);
            let token = cancel.child_token();
            let request = request.clone();

            // The guard moves into the task so an abort or panic still
            // settles the admission.
            calls.spawn(async move {
                let started = Instant::now();
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    r = tokio::time::timeout_at(deadline, backend.infer(&request)) => Some(r),
                };

                match outcome {
                    None => {
                        guard.cancelled();
                        debug!(backend = %kind, "Losing inference call cancelled");
                        LaneOutcome::Cancelled
                    }
                    Some(Ok(Ok(mut result))) => {
                        guard.success();
                        let elapsed = started.elapsed();
                        Metrics::inference_latency(kind.as_str(), elapsed.as_secs_f64() * 1000.0);
                        result.backend = kind;
                        result.latency_ms = elapsed.as_millis() as u64;
                        LaneOutcome::Success(result)
                    }
                    Some(Ok(Err(e))) => {
                        guard.failure();
                        LaneOutcome::Failed(e)
                    }
                    Some(Err(_)) => {
                        guard.failure();
                        LaneOutcome::Failed(InferenceError::DeadlineExceeded {
                            backend: kind,
                            deadline_ms,
                        })
                    }
                }
            });
        }

        if calls.is_empty() {
            Metrics::inference_outcome("unavailable");
            return Err(InferenceError::Unavailable(
                "all backend circuits open".to_string(),
            ));
        }

        let mut errors = Vec::new();
        let mut winner = None;
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok(LaneOutcome::Success(result)) => {
                    winner = Some(result);
                    break;
                }
                Ok(LaneOutcome::Failed(e)) => {
                    warn!(symbol = %request.symbol, error = %e, "Inference call failed");
                    errors.push(e);
                }
                Ok(LaneOutcome::Cancelled) => {}
                Err(e) => {
                    warn!(error = %e, "Inference task aborted");
                    errors.push(InferenceError::Unavailable(e.to_string()));
                }
            }
        }

        cancel.cancel();
        while calls.join_next().await.is_some() {}

        match winner {
            Some(result) => {
                Metrics::inference_outcome(result.backend.as_str());
                debug!(
                    symbol = %result.symbol,
                    backend = %result.backend,
                    latency_ms = result.latency_ms,
                    "Inference race won"
                );
                Ok(result)
            }
            None => {
                let all_timed_out = errors
                    .iter()
                    .all(|e| matches!(e, InferenceError::DeadlineExceeded { .. }));
                Metrics::inference_outcome(if all_timed_out { "deadline" } else { "unavailable" });
                let reasons: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                Err(InferenceError::Unavailable(reasons.join("; ")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BoxFuture;
    use crate::breaker::CircuitState;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tickflow_core::Symbol;

    /// Sets a flag when dropped before completing.
    struct CancelHook {
        armed: bool,
        fired: Arc<AtomicBool>,
    }

    impl Drop for CancelHook {
        fn drop(&mut self) {
            if self.armed {
                self.fired.store(true, Ordering::SeqCst);
            }
        }
    }

    struct MockBackend {
        kind: BackendKind,
        delay: Duration,
        fail: AtomicBool,
        panics: AtomicBool,
        prediction: f64,
        calls: AtomicU32,
        cancelled: Arc<AtomicBool>,
    }

    impl MockBackend {
        fn new(kind: BackendKind, delay_ms: u64, prediction: f64) -> Arc<Self> {
            Arc::new(Self {
                kind,
                delay: Duration::from_millis(delay_ms),
                fail: AtomicBool::new(false),
                panics: AtomicBool::new(false),
                prediction,
                calls: AtomicU32::new(0),
                cancelled: Arc::new(AtomicBool::new(false)),
            })
        }

        fn failing(kind: BackendKind, delay_ms: u64) -> Arc<Self> {
            let mock = Self::new(kind, delay_ms, 0.0);
            mock.fail.store(true, Ordering::SeqCst);
            mock
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn was_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    impl InferenceBackend for MockBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn infer<'a>(
            &'a self,
            request: &'a InferenceRequest,
        ) -> BoxFuture<'a, InferResult<InferenceResult>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let mut hook = CancelHook {
                    armed: true,
                    fired: self.cancelled.clone(),
                };
                tokio::time::sleep(self.delay).await;
                hook.armed = false;

                if self.panics.load(Ordering::SeqCst) {
                    panic!("mock backend panic");
                }
                if self.fail.load(Ordering::SeqCst) {
                    return Err(InferenceError::Backend {
                        backend: self.kind,
                        reason: "mock failure".to_string(),
                    });
                }
                Ok(InferenceResult {
                    symbol: request.symbol.clone(),
                    backend: self.kind,
                    latency_ms: 0,
                    prediction: self.prediction,
                    confidence: 0.8,
                })
            })
        }

        fn health_check(&self) -> BoxFuture<'_, InferResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn request() -> InferenceRequest {
        InferenceRequest {
            symbol: Symbol::new("AAPL").unwrap(),
            feature_vector: vec![0.0; 6],
            horizon: 5,
        }
    }

    fn orchestrator(a: Arc<MockBackend>, b: Arc<MockBackend>) -> InferenceOrchestrator {
        InferenceOrchestrator::new(a, b, &InferenceConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_backend_wins_and_loser_cancelled() {
        let a = MockBackend::new(BackendKind::Gpu, 10, 0.5);
        let b = MockBackend::new(BackendKind::Cpu, 100, -0.5);
        let orch = orchestrator(a.clone(), b.clone());

        let result = orch.predict(request()).await.unwrap();
        assert_eq!(result.backend, BackendKind::Gpu);
        assert_eq!(result.prediction, 0.5);
        assert!((10..=11).contains(&result.latency_ms));
        assert!(b.was_cancelled());
        assert!(!a.was_cancelled());
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_wins_when_primary_fails() {
        let a = MockBackend::failing(BackendKind::Gpu, 1);
        let b = MockBackend::new(BackendKind::Cpu, 50, 0.3);
        let orch = orchestrator(a.clone(), b.clone());

        let result = orch.predict(request()).await.unwrap();
        assert_eq!(result.backend, BackendKind::Cpu);
        assert_eq!(
            orch.breaker(BackendKind::Gpu).unwrap().consecutive_failures(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_fail_is_unavailable() {
        let a = MockBackend::failing(BackendKind::Gpu, 5);
        let b = MockBackend::failing(BackendKind::Cpu, 5);
        let orch = orchestrator(a, b);

        let err = orch.predict(request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_is_unavailable() {
        let a = MockBackend::new(BackendKind::Gpu, 500, 0.5);
        let b = MockBackend::new(BackendKind::Cpu, 300, 0.5);
        let orch = orchestrator(a.clone(), b.clone());

        let started = Instant::now();
        let err = orch.predict(request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(_)));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(200) && waited < Duration::from_millis(210));
        // Timed-out calls are dropped too
        assert!(a.was_cancelled());
        assert!(b.was_cancelled());
        assert_eq!(
            orch.breaker(BackendKind::Gpu).unwrap().consecutive_failures(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_primary_until_cooldown() {
        let a = MockBackend::failing(BackendKind::Gpu, 1);
        let b = MockBackend::new(BackendKind::Cpu, 20, 0.2);
        let orch = orchestrator(a.clone(), b.clone());

        for _ in 0..5 {
            let result = orch.predict(request()).await.unwrap();
            assert_eq!(result.backend, BackendKind::Cpu);
        }
        assert_eq!(a.calls(), 5);
        let gpu = orch.breaker(BackendKind::Gpu).unwrap();
        assert_eq!(gpu.state(), CircuitState::Open);

        for _ in 0..10 {
            orch.predict(request()).await.unwrap();
        }
        assert_eq!(a.calls(), 5, "no calls to an open backend");
        assert_eq!(b.calls(), 15);

        tokio::time::advance(Duration::from_secs(30)).await;
        orch.predict(request()).await.unwrap();
        assert_eq!(a.calls(), 6, "one probe after cooldown");
        assert_eq!(gpu.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_closes_circuit() {
        let a = MockBackend::failing(BackendKind::Gpu, 1);
        let b = MockBackend::new(BackendKind::Cpu, 20, 0.2);
        let orch = orchestrator(a.clone(), b.clone());
        for _ in 0..5 {
            orch.predict(request()).await.unwrap();
        }

        a.fail.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(30)).await;
        let result = orch.predict(request()).await.unwrap();
        assert_eq!(result.backend, BackendKind::Gpu);
        assert_eq!(
            orch.breaker(BackendKind::Gpu).unwrap().state(),
            CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_circuits_open() {
        let a = MockBackend::failing(BackendKind::Gpu, 1);
        let b = MockBackend::failing(BackendKind::Cpu, 1);
        let orch = orchestrator(a.clone(), b.clone());
        for _ in 0..5 {
            let _ = orch.predict(request()).await;
        }
        let err = orch.predict(request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(ref m) if m.contains("circuits open")));
        assert_eq!(a.calls(), 5);
        assert_eq!(b.calls(), 5);
    }

    async fn open_primary(orch: &InferenceOrchestrator) {
        for _ in 0..5 {
            orch.predict(request()).await.unwrap();
        }
        assert_eq!(
            orch.breaker(BackendKind::Gpu).unwrap().state(),
            CircuitState::Open
        );
        tokio::time::advance(Duration::from_secs(30)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_race_releases_probe() {
        let a = MockBackend::failing(BackendKind::Gpu, 1);
        let b = MockBackend::new(BackendKind::Cpu, 20, 0.2);
        let orch = orchestrator(a.clone(), b.clone());
        open_primary(&orch).await;

        let abandoned = tokio::time::timeout(Duration::ZERO, orch.predict(request())).await;
        assert!(abandoned.is_err());
        // Let the runtime drop the aborted calls
        tokio::time::sleep(Duration::from_millis(1)).await;
        let gpu = orch.breaker(BackendKind::Gpu).unwrap();
        assert_eq!(gpu.state(), CircuitState::HalfOpen);

        a.fail.store(false, Ordering::SeqCst);
        let result = orch.predict(request()).await.unwrap();
        assert_eq!(result.backend, BackendKind::Gpu);
        assert_eq!(gpu.state(), CircuitState::Closed);
        assert!(a.calls() >= 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_probe_reopens_circuit() {
        let a = MockBackend::failing(BackendKind::Gpu, 1);
        let b = MockBackend::new(BackendKind::Cpu, 20, 0.2);
        let orch = orchestrator(a.clone(), b.clone());
        open_primary(&orch).await;

        a.panics.store(true, Ordering::SeqCst);
        let result = orch.predict(request()).await.unwrap();
        assert_eq!(result.backend, BackendKind::Cpu);
        let gpu = orch.breaker(BackendKind::Gpu).unwrap();
        assert_eq!(gpu.state(), CircuitState::Open);
        assert_eq!(a.calls(), 6);

        a.panics.store(false, Ordering::SeqCst);
        a.fail.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(30)).await;
        let result = orch.predict(request()).await.unwrap();
        assert_eq!(result.backend, BackendKind::Gpu);
        assert_eq!(gpu.state(), CircuitState::Closed);
    }
}
