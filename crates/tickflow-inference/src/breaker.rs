//! Per-backend circuit breaker.
//!
//! State lives in atomics so the orchestrator and its spawned calls can share
//! one breaker without locks:
//!
//! - `Closed`: every call admitted; `failure_threshold` consecutive failures
//!   open the circuit.
//! - `Open`: calls rejected until `cooldown` has elapsed since opening.
//! - `HalfOpen`: exactly one probe admitted at a time. A failed probe reopens
//!   the circuit; `success_threshold` successful probes close it.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickflow_core::BackendKind;
use tickflow_telemetry::Metrics;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Closed,
            1 => Self::HalfOpen,
            _ => Self::Open,
        }
    }
}

/// Result of asking the breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single half-open trial call.
    Probe,
    Rejected,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub backend: BackendKind,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

pub struct CircuitBreaker {
    backend: BackendKind,
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
    epoch: Instant,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    /// Milliseconds since `epoch` when the circuit last opened.
    opened_at_ms: AtomicU64,
    probe_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(
        backend: BackendKind,
        failure_threshold: u32,
        success_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Metrics::backend_state(backend.as_str(), CircuitState::Closed as u8);
        Self {
            backend,
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            cooldown,
            epoch: Instant::now(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            backend: self.backend,
            state: self.state(),
            consecutive_failures: self.consecutive_failures(),
        }
    }

    /// Ask to issue a call. An open circuit whose cooldown has elapsed moves
    /// to half-open here.
    pub fn try_acquire(&self) -> Admission {
        match self.state() {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
                if self.now_ms().saturating_sub(opened_at) < self.cooldown.as_millis() as u64 {
                    return Admission::Rejected;
                }
                if self.transition(CircuitState::Open, CircuitState::HalfOpen) {
                    info!(backend = %self.backend, "Circuit half-open, admitting probe");
                }
                self.try_probe()
            }
            CircuitState::HalfOpen => self.try_probe(),
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        if self.state() != CircuitState::HalfOpen {
            return;
        }
        let successes = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
        if successes >= self.success_threshold
            && self.transition(CircuitState::HalfOpen, CircuitState::Closed)
        {
            self.consecutive_successes.store(0, Ordering::SeqCst);
            info!(backend = %self.backend, "Circuit closed");
        }
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.consecutive_successes.store(0, Ordering::SeqCst);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        match self.state() {
            CircuitState::HalfOpen => {
                self.open_from(CircuitState::HalfOpen, failures);
                self.probe_in_flight.store(false, Ordering::SeqCst);
            }
            CircuitState::Closed if failures >= self.failure_threshold => {
                self.open_from(CircuitState::Closed, failures);
            }
            _ => {}
        }
    }

    /// A call was abandoned before it finished. Frees the probe slot without
    /// counting a success or failure.
    pub fn record_cancelled(&self, admission: Admission) {
        if admission == Admission::Probe {
            self.probe_in_flight.store(false, Ordering::SeqCst);
        }
    }

    /// Tie `admission` to a guard that settles it when the call is dropped
    /// without an outcome. A panicking call counts as a failure, an aborted
    /// one as a cancellation.
    pub fn admit(self: &Arc<Self>, admission: Admission) -> AdmissionGuard {
        AdmissionGuard {
            breaker: self.clone(),
            admission,
            settled: false,
        }
    }

    fn try_probe(&self) -> Admission {
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Admission::Probe
        } else {
            Admission::Rejected
        }
    }

    fn open_from(&self, from: CircuitState, failures: u32) {
        self.opened_at_ms.store(self.now_ms(), Ordering::SeqCst);
        if self.transition(from, CircuitState::Open) {
            warn!(
                backend = %self.backend,
                consecutive_failures = failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        let changed = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            Metrics::backend_state(self.backend.as_str(), to as u8);
        }
        changed
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Outstanding admission of one call. See [`CircuitBreaker::admit`].
pub struct AdmissionGuard {
    breaker: Arc<CircuitBreaker>,
    admission: Admission,
    settled: bool,
}

impl AdmissionGuard {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }

    pub fn cancelled(mut self) {
        self.settled = true;
        self.breaker.record_cancelled(self.admission);
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if std::thread::panicking() {
            self.breaker.record_failure();
        } else {
            self.breaker.record_cancelled(self.admission);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BackendKind::Gpu, 3, 1, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let b = breaker();
        for _ in 0..2 {
            assert_eq!(b.try_acquire(), Admission::Allowed);
            b.record_failure();
        }
        assert_eq!(b.state(), CircuitState::Closed);
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.try_acquire(), Admission::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_streak() {
        let b = breaker();
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_probe() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(b.try_acquire(), Admission::Rejected);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(b.try_acquire(), Admission::Probe);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.try_acquire(), Admission::Rejected);

        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.try_acquire(), Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(b.try_acquire(), Admission::Probe);
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);

        // Cooldown restarts from the failed probe
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(b.try_acquire(), Admission::Rejected);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(b.try_acquire(), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_frees_slot() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        let admission = b.try_acquire();
        assert_eq!(admission, Admission::Probe);
        b.record_cancelled(admission);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.try_acquire(), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_frees_probe_slot() {
        let b = Arc::new(breaker());
        for _ in 0..3 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        let guard = b.admit(b.try_acquire());
        assert_eq!(b.try_acquire(), Admission::Rejected);
        drop(guard);
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let guard = b.admit(b.try_acquire());
        assert_eq!(guard.admission, Admission::Probe);
        guard.success();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_probe_reopens() {
        let b = Arc::new(breaker());
        for _ in 0..3 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        let guard = b.admit(b.try_acquire());
        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("backend blew up");
        }));
        assert!(unwound.is_err());
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(b.try_acquire(), Admission::Probe);
    }
}
