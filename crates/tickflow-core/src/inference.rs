//! Inference request and result types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::signal::FeatureVector;
use crate::tick::Symbol;

/// Which backend produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Latency-optimized accelerator backend.
    Gpu,
    /// Reliable fallback backend.
    Cpu,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub symbol: Symbol,
    pub feature_vector: Vec<f64>,
    /// Forecast horizon in bars.
    pub horizon: u32,
}

impl InferenceRequest {
    pub fn new(symbol: Symbol, features: &FeatureVector, horizon: u32) -> Self {
        Self {
            symbol,
            feature_vector: features.to_vec(),
            horizon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub symbol: Symbol,
    pub backend: BackendKind,
    pub latency_ms: u64,
    /// Directional forecast in [-1, 1].
    pub prediction: f64,
    /// Model confidence in [0, 1].
    pub confidence: f64,
}

impl InferenceResult {
    /// Signed contribution used by the decision engine, clamped to [-1, 1].
    pub fn signed_confidence(&self) -> f64 {
        (self.prediction.clamp(-1.0, 1.0) * self.confidence.clamp(0.0, 1.0)).clamp(-1.0, 1.0)
    }
}
