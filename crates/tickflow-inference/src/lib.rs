//! Inference orchestration for tickflow.
//!
//! - `InferenceBackend`: trait seam for model servers (`HttpBackend` over reqwest)
//! - `CircuitBreaker`: per-backend closed/open/half-open health on atomics
//! - `InferenceOrchestrator`: concurrent race under a hard deadline, first
//!   success wins, loser cancelled

pub mod backend;
pub mod breaker;
pub mod config;
pub mod error;
pub mod http;
pub mod orchestrator;

pub use backend::{BoxFuture, InferenceBackend};
pub use breaker::{Admission, AdmissionGuard, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use config::InferenceConfig;
pub use error::{InferResult, InferenceError};
pub use http::HttpBackend;
pub use orchestrator::InferenceOrchestrator;
