//! Scored detector output.
//!
//! A [`Signal`] is immutable once emitted. Its id is the idempotency key for
//! every downstream consumer, so it must be unique and ordered by time within
//! a symbol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tick::Symbol;

/// Signal identifier.
///
/// Format: `sig_{symbol}_{timestamp_ms}_{seq}` with a zero-padded per-symbol
/// sequence, so ids sort by time within a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(String);

impl SignalId {
    pub fn new(symbol: &Symbol, timestamp: DateTime<Utc>, seq: u64) -> Self {
        Self(format!(
            "sig_{}_{}_{:08}",
            symbol,
            timestamp.timestamp_millis(),
            seq
        ))
    }

    /// Wrap an id read back from the bus.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SignalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Pattern label attached to a signal: the dominant sub-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    EmaCrossover,
    VwapDeviation,
    VolumeSpike,
    /// Price moved away from the fast EMA by more than the breakout band.
    VolatilityBreakout,
    /// No single sub-score carries the majority of the weight.
    Composite,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmaCrossover => "ema_crossover",
            Self::VwapDeviation => "vwap_deviation",
            Self::VolumeSpike => "volume_spike",
            Self::VolatilityBreakout => "volatility_breakout",
            Self::Composite => "composite",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized sub-scores, each in [-1, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub ema_crossover: f64,
    pub vwap_deviation: f64,
    pub volume_spike: f64,
    #[serde(default)]
    pub volatility_breakout: f64,
}

/// Snapshot of the symbol state at emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMeta {
    pub price: f64,
    pub volume: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    /// Undefined right after a session reset.
    pub vwap: Option<f64>,
    /// SMA of the window before this tick.
    pub volume_sma: Option<f64>,
    /// Welford standard deviation of price.
    pub volatility: Option<f64>,
    /// Fractional change from the previous tick.
    pub momentum: f64,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub tick_count: u64,
    pub sub_scores: SubScores,
}

/// Scored trading signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    /// Weighted score in [-1, 1]. Positive is bullish.
    pub score: f64,
    pub pattern: PatternKind,
    pub confidence: f64,
    pub meta: SignalMeta,
}

impl Signal {
    /// Features sent to the inference backends.
    pub fn features(&self) -> FeatureVector {
        FeatureVector::from_meta(&self.meta)
    }
}

/// Model input derived from [`SignalMeta`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub ema_diff: f64,
    pub ema_diff_pct: f64,
    /// Price distance from VWAP as a fraction of VWAP; 0 when VWAP is undefined.
    pub vwap_deviation: f64,
    /// Volume over prior SMA; 1 when the SMA is unknown.
    pub volume_ratio: f64,
    pub momentum: f64,
    pub volatility: f64,
}

impl FeatureVector {
    pub fn from_meta(meta: &SignalMeta) -> Self {
        let ema_diff = meta.ema_fast - meta.ema_slow;
        let ema_diff_pct = if meta.ema_slow != 0.0 {
            ema_diff / meta.ema_slow
        } else {
            0.0
        };
        let vwap_deviation = match meta.vwap {
            Some(vwap) if vwap > 0.0 => (meta.price - vwap) / vwap,
            _ => 0.0,
        };
        let volume_ratio = match meta.volume_sma {
            Some(sma) if sma > 0.0 => meta.volume / sma,
            _ => 1.0,
        };
        Self {
            ema_diff,
            ema_diff_pct,
            vwap_deviation,
            volume_ratio,
            momentum: meta.momentum,
            volatility: meta.volatility.unwrap_or(0.0),
        }
    }

    /// Flattened in wire order.
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.ema_diff,
            self.ema_diff_pct,
            self.vwap_deviation,
            self.volume_ratio,
            self.momentum,
            self.volatility,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta() -> SignalMeta {
        SignalMeta {
            price: 105.0,
            volume: 50.0,
            ema_fast: 101.0,
            ema_slow: 100.0,
            vwap: Some(100.0),
            volume_sma: Some(10.0),
            volatility: Some(2.5),
            momentum: 0.05,
            rsi: Some(70.0),
            atr: Some(3.0),
            tick_count: 4,
            sub_scores: SubScores::default(),
        }
    }

    #[test]
    fn test_signal_id_format_and_order() {
        let sym = Symbol::new("AAPL").unwrap();
        let t1 = Utc.timestamp_millis_opt(1_000).unwrap();
        let t2 = Utc.timestamp_millis_opt(2_000).unwrap();
        let a = SignalId::new(&sym, t1, 1);
        let b = SignalId::new(&sym, t2, 2);
        assert_eq!(a.as_str(), "sig_AAPL_1000_00000001");
        assert!(a < b);
    }

    #[test]
    fn test_pattern_serde_snake_case() {
        let json = serde_json::to_string(&PatternKind::VolumeSpike).unwrap();
        assert_eq!(json, "\"volume_spike\"");
        assert_eq!(PatternKind::EmaCrossover.to_string(), "ema_crossover");
    }

    #[test]
    fn test_feature_vector_from_meta() {
        let f = FeatureVector::from_meta(&meta());
        assert!((f.ema_diff - 1.0).abs() < 1e-12);
        assert!((f.ema_diff_pct - 0.01).abs() < 1e-12);
        assert!((f.vwap_deviation - 0.05).abs() < 1e-12);
        assert!((f.volume_ratio - 5.0).abs() < 1e-12);
        assert_eq!(f.to_vec().len(), 6);
    }

    #[test]
    fn test_feature_vector_undefined_inputs() {
        let mut m = meta();
        m.vwap = None;
        m.volume_sma = None;
        m.volatility = None;
        let f = FeatureVector::from_meta(&m);
        assert_eq!(f.vwap_deviation, 0.0);
        assert_eq!(f.volume_ratio, 1.0);
        assert_eq!(f.volatility, 0.0);
    }
}
