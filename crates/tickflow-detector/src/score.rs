//! Sub-score computation.
//!
//! Every sub-score is normalized to [-1, 1] so the configured weights are
//! directly comparable.

use serde::{Deserialize, Serialize};
use tickflow_core::{PatternKind, SubScores};
use tickflow_feed::SymbolState;

use crate::config::DetectorConfig;

/// Result of scoring a symbol state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub sub_scores: SubScores,
    /// Weighted sum, clamped to [-1, 1].
    pub score: f64,
    pub pattern: PatternKind,
    pub confidence: f64,
}

/// `(fast - slow) / slow`, scaled and clipped to [-1, 1].
pub fn ema_crossover(fast: f64, slow: f64, scale: f64) -> f64 {
    if slow == 0.0 {
        return 0.0;
    }
    ((fast - slow) / slow * scale).clamp(-1.0, 1.0)
}

/// `(price - vwap) / stddev` clipped to [-clip, clip] then divided by clip.
///
/// Zero while VWAP or volatility is undefined or the stddev is zero.
pub fn vwap_deviation(price: f64, vwap: Option<f64>, stddev: Option<f64>, clip: f64) -> f64 {
    match (vwap, stddev) {
        (Some(vwap), Some(sd)) if sd > 0.0 => ((price - vwap) / sd).clamp(-clip, clip) / clip,
        _ => 0.0,
    }
}

/// `(volume - sma) / sma` clipped to [0, cap] then divided by cap, signed
/// by `direction`.
///
/// Below-average volume is not a spike and scores zero.
pub fn volume_spike(volume: f64, prior_sma: Option<f64>, cap: f64, direction: f64) -> f64 {
    if direction == 0.0 {
        return 0.0;
    }
    match prior_sma {
        Some(sma) if sma > 0.0 => ((volume - sma) / sma).clamp(0.0, cap) / cap * direction.signum(),
        _ => 0.0,
    }
}

/// Distance of `price` from the fast EMA in standard deviations, scored once
/// it leaves the `sigma` band: `z / (2 * sigma)` capped at 1, signed by the
/// side of the EMA the price broke to.
///
/// Zero while volatility is undefined or zero.
pub fn volatility_breakout(price: f64, ema_fast: f64, stddev: Option<f64>, sigma: f64) -> f64 {
    let Some(sd) = stddev.filter(|sd| *sd > 0.0) else {
        return 0.0;
    };
    let z = (price - ema_fast).abs() / sd;
    if z <= sigma {
        return 0.0;
    }
    (z / (2.0 * sigma)).min(1.0) * (price - ema_fast).signum()
}

/// Direction of the latest price move; falls back to the EMA gap when the
/// price did not move.
pub fn move_direction(state: &SymbolState) -> f64 {
    if let (Some(prev), Some(last)) = (state.prev_price(), state.last_price()) {
        if last != prev {
            return (last - prev).signum();
        }
    }
    match (state.ema_fast(), state.ema_slow()) {
        (Some(fast), Some(slow)) if fast != slow => (fast - slow).signum(),
        _ => 0.0,
    }
}

/// Score the current state. `None` until the state has enough data.
pub fn score_state(state: &SymbolState, config: &DetectorConfig) -> Option<ScoreBreakdown> {
    if state.welford_count() < config.min_ticks.max(1) {
        return None;
    }
    let price = state.last_price()?;
    let fast = state.ema_fast()?;
    let slow = state.ema_slow()?;

    let sub_scores = SubScores {
        ema_crossover: ema_crossover(fast, slow, config.ema_scale),
        vwap_deviation: vwap_deviation(price, state.vwap(), state.volatility(), config.z_clip),
        volume_spike: volume_spike(
            state.last_volume(),
            state.prior_volume_sma(),
            config.volume_spike_cap,
            move_direction(state),
        ),
        volatility_breakout: if state.welford_count() >= config.breakout_min_ticks {
            volatility_breakout(price, fast, state.volatility(), config.breakout_sigma)
        } else {
            0.0
        },
    };

    let contributions = [
        (PatternKind::EmaCrossover, config.ema_weight * sub_scores.ema_crossover),
        (PatternKind::VwapDeviation, config.vwap_weight * sub_scores.vwap_deviation),
        (PatternKind::VolumeSpike, config.volume_weight * sub_scores.volume_spike),
        (
            PatternKind::VolatilityBreakout,
            config.breakout_weight * sub_scores.volatility_breakout,
        ),
    ];
    let score = contributions
        .iter()
        .map(|(_, c)| c)
        .sum::<f64>()
        .clamp(-1.0, 1.0);

    let sufficiency = if config.warmup_ticks == 0 {
        1.0
    } else {
        (state.welford_count() as f64 / config.warmup_ticks as f64).min(1.0)
    };

    Some(ScoreBreakdown {
        sub_scores,
        score,
        pattern: dominant_pattern(&contributions, config.dominance_share),
        confidence: (score.abs() * sufficiency).clamp(0.0, 1.0),
    })
}

fn dominant_pattern(contributions: &[(PatternKind, f64)], share: f64) -> PatternKind {
    let total: f64 = contributions.iter().map(|(_, c)| c.abs()).sum();
    if total == 0.0 {
        return PatternKind::Composite;
    }
    contributions
        .iter()
        .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
        .filter(|(_, c)| c.abs() / total >= share)
        .map(|(kind, _)| *kind)
        .unwrap_or(PatternKind::Composite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_crossover_clipped() {
        assert!((ema_crossover(101.0, 100.0, 50.0) - 0.5).abs() < 1e-12);
        assert_eq!(ema_crossover(110.0, 100.0, 50.0), 1.0);
        assert_eq!(ema_crossover(90.0, 100.0, 50.0), -1.0);
        assert_eq!(ema_crossover(1.0, 0.0, 50.0), 0.0);
    }

    #[test]
    fn test_vwap_deviation_clip_and_normalize() {
        assert!((vwap_deviation(103.0, Some(100.0), Some(2.0), 3.0) - 0.5).abs() < 1e-12);
        assert_eq!(vwap_deviation(120.0, Some(100.0), Some(2.0), 3.0), 1.0);
        assert_eq!(vwap_deviation(80.0, Some(100.0), Some(2.0), 3.0), -1.0);
        assert_eq!(vwap_deviation(120.0, None, Some(2.0), 3.0), 0.0);
        assert_eq!(vwap_deviation(120.0, Some(100.0), Some(0.0), 3.0), 0.0);
    }

    #[test]
    fn test_volume_spike_signed_by_direction() {
        assert_eq!(volume_spike(50.0, Some(10.0), 2.0, 1.0), 1.0);
        assert_eq!(volume_spike(50.0, Some(10.0), 2.0, -1.0), -1.0);
        assert!((volume_spike(15.0, Some(10.0), 2.0, 1.0) - 0.25).abs() < 1e-12);
        assert_eq!(volume_spike(5.0, Some(10.0), 2.0, 1.0), 0.0);
        assert_eq!(volume_spike(50.0, Some(10.0), 2.0, 0.0), 0.0);
        assert_eq!(volume_spike(50.0, None, 2.0, 1.0), 0.0);
    }

    #[test]
    fn test_volatility_breakout_band() {
        assert_eq!(volatility_breakout(101.0, 100.0, Some(1.0), 2.0), 0.0);
        assert_eq!(volatility_breakout(102.0, 100.0, Some(1.0), 2.0), 0.0);
        assert!((volatility_breakout(103.0, 100.0, Some(1.0), 2.0) - 0.75).abs() < 1e-12);
        assert_eq!(volatility_breakout(110.0, 100.0, Some(1.0), 2.0), 1.0);
        assert!((volatility_breakout(97.0, 100.0, Some(1.0), 2.0) + 0.75).abs() < 1e-12);
        assert_eq!(volatility_breakout(110.0, 100.0, None, 2.0), 0.0);
        assert_eq!(volatility_breakout(110.0, 100.0, Some(0.0), 2.0), 0.0);
    }

    fn quiet_then(last: f64) -> SymbolState {
        use chrono::{TimeZone, Utc};
        use tickflow_core::{Symbol, Tick};
        use tickflow_feed::StateConfig;

        let symbol = Symbol::new("MSFT").unwrap();
        let mut state = SymbolState::new(
            symbol.clone(),
            &StateConfig {
                fast_alpha: Some(0.2),
                slow_alpha: Some(0.1),
                volume_window: 3,
                ..Default::default()
            },
        );
        let prices = (0..10).map(|i| 100.0 + 0.2 * (i % 2) as f64).chain([last]);
        for (i, price) in prices.enumerate() {
            let ts = Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap();
            state.update(&Tick::new(symbol.clone(), ts, price, 10.0)).unwrap();
        }
        state
    }

    #[test]
    fn test_breakout_scores_after_quiet_run() {
        let config = DetectorConfig::default();

        let up = score_state(&quiet_then(103.0), &config).unwrap();
        assert!(up.sub_scores.volatility_breakout > 0.5, "{up:?}");
        let down = score_state(&quiet_then(97.4), &config).unwrap();
        assert!(down.sub_scores.volatility_breakout < -0.5, "{down:?}");
        let calm = score_state(&quiet_then(100.0), &config).unwrap();
        assert_eq!(calm.sub_scores.volatility_breakout, 0.0);

        let dominant = DetectorConfig {
            breakout_weight: 1.0,
            ..Default::default()
        };
        let up = score_state(&quiet_then(103.0), &dominant).unwrap();
        assert_eq!(up.pattern, PatternKind::VolatilityBreakout);
    }

    #[test]
    fn test_breakout_needs_min_ticks() {
        let config = DetectorConfig {
            breakout_min_ticks: 12,
            ..Default::default()
        };
        let state = quiet_then(103.0);
        assert_eq!(state.welford_count(), 11);
        let breakdown = score_state(&state, &config).unwrap();
        assert_eq!(breakdown.sub_scores.volatility_breakout, 0.0);
    }

    #[test]
    fn test_dominant_pattern() {
        let c = [
            (PatternKind::EmaCrossover, 0.1),
            (PatternKind::VwapDeviation, 0.05),
            (PatternKind::VolumeSpike, 0.2),
        ];
        assert_eq!(dominant_pattern(&c, 0.5), PatternKind::VolumeSpike);

        let even = [
            (PatternKind::EmaCrossover, 0.1),
            (PatternKind::VwapDeviation, -0.1),
            (PatternKind::VolumeSpike, 0.1),
        ];
        assert_eq!(dominant_pattern(&even, 0.5), PatternKind::Composite);
        assert_eq!(
            dominant_pattern(&[(PatternKind::EmaCrossover, 0.0)], 0.5),
            PatternKind::Composite
        );
    }
}
