//! Order decision types and identifiers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::inference::BackendKind;
use crate::signal::SignalId;
use crate::tick::Symbol;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Side implied by a signed score. Zero maps to `None`.
    pub fn from_score(score: f64) -> Option<Self> {
        if score > 0.0 {
            Some(Self::Buy)
        } else if score < 0.0 {
            Some(Self::Sell)
        } else {
            None
        }
    }

    /// Returns 1 for buy, -1 for sell.
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace for order ids derived from signal ids.
const ORDER_ID_NAMESPACE: Uuid = Uuid::from_u128(0x7f3c_1d52_9a0e_4b8c_a1e6_2d4f_b9c0_8e13);

/// Order decision identifier.
///
/// Derived deterministically from the originating [`SignalId`] so a
/// redelivered signal always maps to the same order id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Format: `ord_{uuid_v5(signal_id)}`
    pub fn for_signal(signal_id: &SignalId) -> Self {
        let uuid = Uuid::new_v5(&ORDER_ID_NAMESPACE, signal_id.as_str().as_bytes());
        Self(format!("ord_{}", uuid.simple()))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Inputs that produced a decision, published with the order for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactors {
    pub signal_score: f64,
    /// `prediction * confidence`, or 0 when inference was unavailable.
    pub inference_signed: f64,
    /// `None` when the snapshot was missing or stale.
    pub sentiment_score: Option<f64>,
    pub combined: f64,
    pub volatility: f64,
    pub inference_backend: Option<BackendKind>,
    /// Free-form markers such as `degraded` or `sentiment_stale`.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ContributingFactors {
    pub fn is_degraded(&self) -> bool {
        self.tags.iter().any(|t| t == "degraded")
    }
}

/// Sized decision emitted to the order bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDecision {
    pub id: OrderId,
    pub signal_id: SignalId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub confidence: f64,
    pub contributing_factors: ContributingFactors,
    pub decided_at: DateTime<Utc>,
}
