//! Sentiment collaborator data.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::tick::Symbol;

/// Aggregated sentiment for a symbol over a lookback window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    pub symbol: Symbol,
    /// Score in [-1, 1].
    pub score: f64,
    /// Lookback window, e.g. `24h`.
    pub window: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl SentimentSnapshot {
    /// True when the snapshot is no older than `max_age` at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now.signed_duration_since(self.timestamp) <= max_age
    }

    pub fn clamped_score(&self) -> f64 {
        if self.score.is_finite() {
            self.score.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}
