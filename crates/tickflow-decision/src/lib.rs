//! Decision engine for tickflow.
//!
//! Consumes signals from the signal bus and emits sized order decisions:
//! - `SentimentCache`: TTL cache fed by a background refresher; read-only on the hot path
//! - `combine` / `PositionSizer`: weighted blend and volatility-scaled sizing
//! - `DecisionEngine`: Received → Enriching → Scored → Sized → Published | Discarded
//! - `OrderPublisher`: order stream writes deduplicated on the order id
//! - `DecisionWorker`: consumer-group member with lease-bounded processing

pub mod config;
pub mod engine;
pub mod error;
pub mod publisher;
pub mod sentiment;
pub mod sizing;
pub mod worker;

pub use config::{DecisionConfig, SentimentConfig};
pub use engine::{
    Decision, DecisionEngine, DecisionStage, DiscardReason, EngineStats, EngineStatsSnapshot,
    ProcessOutcome, TAG_DEGRADED, TAG_SENTIMENT_MISSING,
};
pub use error::{DecisionError, DecisionResult};
pub use publisher::OrderPublisher;
pub use sentiment::{HttpSentimentClient, SentimentCache, SentimentSource};
pub use sizing::{combine, PositionSizer, SizedPosition};
pub use worker::{DecisionWorker, HandleOutcome};
