//! Scored pattern detection for tickflow.
//!
//! Combines three normalized sub-scores computed from a symbol's streaming
//! state into a single score in [-1, 1]:
//! - EMA crossover: relative fast/slow EMA gap
//! - VWAP deviation: z-score of price against session VWAP
//! - Volume spike: tick volume against the prior SMA, signed by price move
//!
//! A signal is emitted when `|score|` strictly exceeds the threshold and the
//! per-symbol cooldown has elapsed.

pub mod config;
pub mod detector;
pub mod error;
pub mod score;

pub use config::DetectorConfig;
pub use detector::SignalDetector;
pub use error::{DetectorError, DetectorResult};
pub use score::ScoreBreakdown;
