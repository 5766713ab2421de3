//! Core domain types for the tickflow pipeline.
//!
//! This crate provides the types shared by every stage of the system:
//! - `Symbol`, `Tick`: market data input
//! - `Signal`, `SignalMeta`, `PatternKind`: scored detector output
//! - `OrderDecision`, `Side`: sized decisions for the order bus
//! - `InferenceRequest`, `InferenceResult`, `BackendKind`: model calls
//! - `SentimentSnapshot`: read-only sentiment collaborator data
//! - `session`: trading-session keys used for VWAP resets

pub mod error;
pub mod inference;
pub mod order;
pub mod sentiment;
pub mod session;
pub mod signal;
pub mod tick;

pub use error::{CoreError, Result};
pub use inference::{BackendKind, InferenceRequest, InferenceResult};
pub use order::{ContributingFactors, OrderDecision, OrderId, Side};
pub use sentiment::SentimentSnapshot;
pub use session::{session_key_at, SessionKey};
pub use signal::{FeatureVector, PatternKind, Signal, SignalId, SignalMeta, SubScores};
pub use tick::{Symbol, Tick};
