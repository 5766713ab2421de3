//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] tickflow_core::CoreError),

    #[error("Feed error: {0}")]
    Feed(#[from] tickflow_feed::FeedError),

    #[error("Detector error: {0}")]
    Detector(#[from] tickflow_detector::DetectorError),

    #[error("Bus error: {0}")]
    Bus(#[from] tickflow_bus::BusError),

    #[error("Inference error: {0}")]
    Inference(#[from] tickflow_inference::InferenceError),

    #[error("Decision error: {0}")]
    Decision(#[from] tickflow_decision::DecisionError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tickflow_telemetry::TelemetryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown requested")]
    Shutdown,
}

pub type AppResult<T> = Result<T, AppError>;
