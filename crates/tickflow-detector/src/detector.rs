//! Signal detector implementation.

use chrono::{DateTime, Duration, Utc};
use tickflow_core::{Signal, SignalId};
use tickflow_feed::SymbolState;
use tickflow_telemetry::Metrics;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::score::{score_state, ScoreBreakdown};

/// Signal detector.
///
/// Scoring is a pure function of the symbol state. Emission additionally
/// requires `|score| > threshold` (strict) and an elapsed cooldown since the
/// symbol's last signal.
pub struct SignalDetector {
    config: DetectorConfig,
    cooldown: Duration,
}

impl SignalDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let cooldown = Duration::milliseconds(config.cooldown_ms);
        Self { config, cooldown }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Score without gating. `None` until the state has enough data.
    pub fn score(&self, state: &SymbolState) -> Option<ScoreBreakdown> {
        score_state(state, &self.config)
    }

    /// Score with threshold and cooldown gates applied. Does not mutate.
    pub fn evaluate(&self, state: &SymbolState, at: DateTime<Utc>) -> Option<ScoreBreakdown> {
        let breakdown = self.score(state)?;

        if breakdown.score.abs() <= self.config.threshold {
            return None;
        }

        if let Some(last) = state.last_signal_time() {
            if at - last < self.cooldown {
                debug!(
                    symbol = %state.symbol(),
                    score = breakdown.score,
                    "Signal suppressed by cooldown"
                );
                return None;
            }
        }

        Some(breakdown)
    }

    /// Check the state after a tick and emit a signal if warranted.
    ///
    /// The signal is stamped with the latest tick time; the state records the
    /// emission so the cooldown applies to the next call.
    pub fn detect(&self, state: &mut SymbolState) -> Option<Signal> {
        let at = state.last_seen()?;
        let breakdown = self.evaluate(state, at)?;
        let meta = state.meta(breakdown.sub_scores)?;
        let seq = state.mark_signal(at);

        let signal = Signal {
            id: SignalId::new(state.symbol(), at, seq),
            symbol: state.symbol().clone(),
            timestamp: at,
            score: breakdown.score,
            pattern: breakdown.pattern,
            confidence: breakdown.confidence,
            meta,
        };

        Metrics::signal_emitted(signal.symbol.as_str(), signal.pattern.as_str(), signal.score);
        debug!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            score = format!("{:.4}", signal.score),
            pattern = %signal.pattern,
            confidence = format!("{:.4}", signal.confidence),
            "Signal emitted"
        );

        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tickflow_core::{PatternKind, Symbol, Tick};
    use tickflow_feed::StateConfig;

    fn sym() -> Symbol {
        Symbol::new("AAPL").unwrap()
    }

    fn tick_at(secs: i64, price: f64, volume: f64) -> Tick {
        Tick::new(
            sym(),
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            price,
            volume,
        )
    }

    fn aapl_state() -> SymbolState {
        SymbolState::new(
            sym(),
            &StateConfig {
                fast_alpha: Some(0.2),
                slow_alpha: Some(0.1),
                volume_window: 3,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_aapl_volume_spike_scenario() {
        let prices = [100.0, 101.0, 99.0, 105.0, 110.0, 108.0];
        let volumes = [10.0, 10.0, 10.0, 50.0, 60.0, 40.0];
        let detector = SignalDetector::new(DetectorConfig::default());
        let mut state = aapl_state();

        let mut emitted = Vec::new();
        for (i, (&p, &v)) in prices.iter().zip(volumes.iter()).enumerate() {
            state.update(&tick_at(i as i64, p, v)).unwrap();
            if let Some(signal) = detector.detect(&mut state) {
                emitted.push((i + 1, signal));
            }
        }

        // Tick 4 fires; ticks 5 and 6 fall inside the 30s cooldown
        assert_eq!(emitted.len(), 1);
        let (tick_no, signal) = &emitted[0];
        assert_eq!(*tick_no, 4);
        assert!(signal.score > 0.3, "score = {}", signal.score);
        assert_eq!(signal.meta.sub_scores.volume_spike, 1.0);
        assert_eq!(signal.pattern, PatternKind::VolumeSpike);
        assert_eq!(signal.meta.volume_sma, Some(10.0));
        assert!((signal.meta.ema_fast - 100.968).abs() < 1e-9);
        assert!(signal.id.as_str().starts_with("sig_AAPL_"));
    }

    #[test]
    fn test_no_signal_before_min_ticks() {
        let detector = SignalDetector::new(DetectorConfig::default());
        let mut state = aapl_state();
        state.update(&tick_at(0, 100.0, 10.0)).unwrap();
        assert!(detector.score(&state).is_none());
        assert!(detector.detect(&mut state).is_none());
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut state = aapl_state();
        for (i, (p, v)) in [(100.0, 10.0), (101.0, 10.0), (99.0, 10.0), (105.0, 50.0)]
            .into_iter()
            .enumerate()
        {
            state.update(&tick_at(i as i64, p, v)).unwrap();
        }
        let at = state.last_seen().unwrap();
        let score = SignalDetector::new(DetectorConfig::default())
            .score(&state)
            .unwrap()
            .score;

        let at_threshold = SignalDetector::new(DetectorConfig {
            threshold: score.abs(),
            ..Default::default()
        });
        assert!(at_threshold.evaluate(&state, at).is_none());

        let below = SignalDetector::new(DetectorConfig {
            threshold: score.abs() - 1e-9,
            ..Default::default()
        });
        assert!(below.evaluate(&state, at).is_some());
    }

    #[test]
    fn test_at_most_one_signal_per_cooldown_window() {
        let detector = SignalDetector::new(DetectorConfig {
            threshold: 0.05,
            cooldown_ms: 10_000,
            ..Default::default()
        });
        let mut state = aapl_state();

        let mut times = Vec::new();
        for i in 0..60 {
            let price = 100.0 * (1.0 + 0.002 * i as f64);
            state.update(&tick_at(i, price, 10.0)).unwrap();
            if let Some(signal) = detector.detect(&mut state) {
                times.push(signal.timestamp);
            }
        }

        assert!(times.len() >= 2, "expected repeated signals on a trend");
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::milliseconds(10_000));
        }
    }

    #[test]
    fn test_signal_ids_ordered_within_symbol() {
        let detector = SignalDetector::new(DetectorConfig {
            threshold: 0.05,
            cooldown_ms: 0,
            ..Default::default()
        });
        let mut state = aapl_state();
        let mut ids = Vec::new();
        for i in 0..20 {
            let price = 100.0 + i as f64;
            state.update(&tick_at(i, price, 10.0)).unwrap();
            if let Some(signal) = detector.detect(&mut state) {
                ids.push(signal.id);
            }
        }
        assert!(ids.len() > 1);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_evaluate_is_pure() {
        let detector = SignalDetector::new(DetectorConfig {
            threshold: 0.05,
            ..Default::default()
        });
        let mut state = aapl_state();
        for i in 0..5 {
            state.update(&tick_at(i, 100.0 + i as f64, 10.0)).unwrap();
        }
        let at = state.last_seen().unwrap();
        let a = detector.evaluate(&state, at);
        let b = detector.evaluate(&state, at);
        assert_eq!(a, b);
        assert!(state.last_signal_time().is_none());
    }
}
