//! Decision engine error types.

use thiserror::Error;
use tickflow_bus::BusError;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Invalid decision configuration: {0}")]
    InvalidConfig(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Sentiment fetch failed: {0}")]
    Sentiment(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DecisionResult<T> = Result<T, DecisionError>;
