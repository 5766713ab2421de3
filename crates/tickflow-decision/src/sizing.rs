//! Score combination and position sizing.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::DecisionConfig;

/// Weighted blend of the three inputs, clamped to [-1, 1]. A missing
/// sentiment contributes nothing.
pub fn combine(
    config: &DecisionConfig,
    signal_score: f64,
    inference_signed: f64,
    sentiment: Option<f64>,
) -> f64 {
    (config.signal_weight * signal_score
        + config.inference_weight * inference_signed
        + config.sentiment_weight * sentiment.unwrap_or(0.0))
    .clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedPosition {
    pub quantity: Decimal,
    /// Volatility the size was computed with, after fallback.
    pub volatility: f64,
    /// Risk-based size before caps and rounding.
    pub raw: f64,
}

/// Volatility-scaled sizing under a quantity cap and a notional cap.
///
/// `min(max_position, equity * risk_limit / (volatility * |combined|))`,
/// then limited so `quantity * price <= max_fraction_of_equity * equity`,
/// then rounded down to `quantity_decimals`.
pub struct PositionSizer {
    equity: f64,
    risk_limit: f64,
    max_position: f64,
    max_fraction_of_equity: f64,
    fallback_volatility_pct: f64,
    quantity_decimals: u32,
}

impl PositionSizer {
    pub fn new(config: &DecisionConfig) -> Self {
        Self {
            equity: config.account_equity,
            risk_limit: config.risk_limit,
            max_position: config.max_position,
            max_fraction_of_equity: config.max_fraction_of_equity,
            fallback_volatility_pct: config.fallback_volatility_pct,
            quantity_decimals: config.quantity_decimals,
        }
    }

    pub fn size(&self, combined: f64, volatility: Option<f64>, price: f64) -> SizedPosition {
        let volatility = volatility
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(price * self.fallback_volatility_pct);

        let strength = combined.abs();
        if strength == 0.0 || !volatility.is_finite() || volatility <= 0.0 {
            return SizedPosition {
                quantity: Decimal::ZERO,
                volatility,
                raw: 0.0,
            };
        }

        let raw = self.equity * self.risk_limit / (volatility * strength);
        let mut quantity = raw.min(self.max_position);
        if price > 0.0 {
            quantity = quantity.min(self.max_fraction_of_equity * self.equity / price);
        }

        let quantity = Decimal::from_f64(quantity)
            .map(|q| q.round_dp_with_strategy(self.quantity_decimals, RoundingStrategy::ToZero))
            .unwrap_or(Decimal::ZERO);

        SizedPosition {
            quantity,
            volatility,
            raw,
        }
    }
}
