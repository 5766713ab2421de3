//! Inference error types.

use thiserror::Error;
use tickflow_core::BackendKind;

#[derive(Debug, Error)]
pub enum InferenceError {
    /// No backend produced a result before the deadline.
    #[error("Inference unavailable: {0}")]
    Unavailable(String),

    #[error("Backend {backend} exceeded deadline of {deadline_ms} ms")]
    DeadlineExceeded { backend: BackendKind, deadline_ms: u64 },

    #[error("Backend {backend} failed: {reason}")]
    Backend { backend: BackendKind, reason: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Invalid inference configuration: {0}")]
    InvalidConfig(String),
}

pub type InferResult<T> = Result<T, InferenceError>;
