//! Market data input types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Ticker symbol, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, trimming whitespace and upper-casing.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let s = raw.as_ref().trim();
        if s.is_empty() {
            return Err(CoreError::InvalidSymbol("empty symbol".to_string()));
        }
        if s.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(CoreError::InvalidSymbol(s.to_string()));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single trade print. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
}

impl Tick {
    pub fn new(symbol: Symbol, timestamp: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self {
            symbol,
            timestamp,
            price,
            volume,
        }
    }

    /// Reject ticks that would corrupt the running statistics.
    ///
    /// Price must be finite and positive, volume finite and positive.
    pub fn validate(&self) -> Result<()> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(CoreError::InvalidPrice(format!(
                "{} price {}",
                self.symbol, self.price
            )));
        }
        if !self.volume.is_finite() || self.volume <= 0.0 {
            return Err(CoreError::InvalidVolume(format!(
                "{} volume {}",
                self.symbol, self.volume
            )));
        }
        Ok(())
    }

    /// Milliseconds since epoch.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tick(price: f64, volume: f64) -> Tick {
        Tick::new(
            Symbol::new("aapl").unwrap(),
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            price,
            volume,
        )
    }

    #[test]
    fn test_symbol_normalized() {
        let s = Symbol::new("  msft ").unwrap();
        assert_eq!(s.as_str(), "MSFT");
        assert_eq!(s.to_string(), "MSFT");
    }

    #[test]
    fn test_symbol_rejects_empty_and_separator() {
        assert!(Symbol::new("").is_err());
        assert!(Symbol::new("   ").is_err());
        // ':' is the stream-name separator
        assert!(Symbol::new("signals:AAPL").is_err());
    }

    #[test]
    fn test_tick_validate() {
        assert!(tick(100.0, 10.0).validate().is_ok());
        assert!(matches!(
            tick(0.0, 10.0).validate(),
            Err(CoreError::InvalidPrice(_))
        ));
        assert!(matches!(
            tick(f64::NAN, 10.0).validate(),
            Err(CoreError::InvalidPrice(_))
        ));
        assert!(matches!(
            tick(100.0, 0.0).validate(),
            Err(CoreError::InvalidVolume(_))
        ));
        assert!(matches!(
            tick(100.0, -5.0).validate(),
            Err(CoreError::InvalidVolume(_))
        ));
    }

    #[test]
    fn test_tick_serde_shape() {
        let json = serde_json::to_value(tick(100.5, 3.0)).unwrap();
        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["price"], 100.5);
    }
}
