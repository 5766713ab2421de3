//! Per-symbol incremental state.
//!
//! Each [`SymbolState`] is exclusively owned by one symbol worker. The
//! [`StateArena`] is that worker's symbol -> state map; it is never shared, so
//! no locking is involved on the tick path.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tickflow_core::{session_key_at, SessionKey, SignalMeta, SubScores, Symbol, Tick};
use tickflow_telemetry::Metrics;
use tracing::{debug, warn};

use crate::error::{FeedError, FeedResult};
use crate::indicators::{period_to_alpha, Ema, RollingSma, Vwap, Welford, WilderAtr, WilderRsi};

fn default_fast_period() -> usize {
    10
}

fn default_slow_period() -> usize {
    20
}

fn default_volume_window() -> usize {
    20
}

fn default_indicator_period() -> usize {
    14
}

fn default_out_of_order_tolerance_ms() -> i64 {
    0
}

/// State engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Fast EMA period. Ignored when `fast_alpha` is set.
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,

    /// Slow EMA period. Ignored when `slow_alpha` is set.
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,

    /// Explicit fast EMA smoothing factor in (0, 1].
    #[serde(default)]
    pub fast_alpha: Option<f64>,

    #[serde(default)]
    pub slow_alpha: Option<f64>,

    /// Volume SMA ring length.
    #[serde(default = "default_volume_window")]
    pub volume_window: usize,

    #[serde(default = "default_indicator_period")]
    pub rsi_period: usize,

    #[serde(default = "default_indicator_period")]
    pub atr_period: usize,

    /// Ticks older than `last_seen - tolerance` are dropped.
    #[serde(default = "default_out_of_order_tolerance_ms")]
    pub out_of_order_tolerance_ms: i64,

    /// Roll the VWAP session automatically at this UTC hour.
    /// `None` leaves session boundaries to the external session signal.
    #[serde(default)]
    pub session_reset_hour_utc: Option<u32>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            fast_alpha: None,
            slow_alpha: None,
            volume_window: default_volume_window(),
            rsi_period: default_indicator_period(),
            atr_period: default_indicator_period(),
            out_of_order_tolerance_ms: default_out_of_order_tolerance_ms(),
            session_reset_hour_utc: None,
        }
    }
}

impl StateConfig {
    pub fn fast_alpha(&self) -> f64 {
        self.fast_alpha
            .unwrap_or_else(|| period_to_alpha(self.fast_period))
    }

    pub fn slow_alpha(&self) -> f64 {
        self.slow_alpha
            .unwrap_or_else(|| period_to_alpha(self.slow_period))
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, alpha) in [("fast", self.fast_alpha()), ("slow", self.slow_alpha())] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(format!("{name} EMA alpha must be in (0, 1], got {alpha}"));
            }
        }
        if self.fast_alpha() < self.slow_alpha() {
            return Err(format!(
                "fast EMA alpha ({}) must not be smaller than slow EMA alpha ({})",
                self.fast_alpha(),
                self.slow_alpha()
            ));
        }
        if self.volume_window == 0 {
            return Err("volume_window must be > 0".to_string());
        }
        if self.rsi_period == 0 || self.atr_period == 0 {
            return Err("rsi_period and atr_period must be > 0".to_string());
        }
        if self.out_of_order_tolerance_ms < 0 {
            return Err("out_of_order_tolerance_ms must be >= 0".to_string());
        }
        if matches!(self.session_reset_hour_utc, Some(h) if h > 23) {
            return Err("session_reset_hour_utc must be in 0..=23".to_string());
        }
        Ok(())
    }
}

/// Effect of a tick on the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Applied after rolling the VWAP session.
    AppliedNewSession,
}

/// Incremental statistics for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolState {
    symbol: Symbol,
    ema_fast: Ema,
    ema_slow: Ema,
    vwap: Vwap,
    welford: Welford,
    volume_sma: RollingSma,
    rsi: WilderRsi,
    atr: WilderAtr,
    /// Volume SMA before the latest tick was pushed.
    prior_volume_sma: Option<f64>,
    last_price: Option<f64>,
    prev_price: Option<f64>,
    last_volume: f64,
    last_seen: Option<DateTime<Utc>>,
    last_signal_time: Option<DateTime<Utc>>,
    session: Option<SessionKey>,
    session_reset_hour_utc: Option<u32>,
    tolerance: Duration,
    signal_seq: u64,
    sessions_reset: u64,
}

impl SymbolState {
    pub fn new(symbol: Symbol, config: &StateConfig) -> Self {
        Self {
            symbol,
            ema_fast: Ema::with_alpha(config.fast_alpha()),
            ema_slow: Ema::with_alpha(config.slow_alpha()),
            vwap: Vwap::default(),
            welford: Welford::default(),
            volume_sma: RollingSma::new(config.volume_window),
            rsi: WilderRsi::new(config.rsi_period),
            atr: WilderAtr::new(config.atr_period),
            prior_volume_sma: None,
            last_price: None,
            prev_price: None,
            last_volume: 0.0,
            last_seen: None,
            last_signal_time: None,
            session: None,
            session_reset_hour_utc: config.session_reset_hour_utc,
            tolerance: Duration::milliseconds(config.out_of_order_tolerance_ms),
            signal_seq: 0,
            sessions_reset: 0,
        }
    }

    /// Apply one tick in O(1).
    ///
    /// Malformed and out-of-order ticks leave the state untouched.
    pub fn update(&mut self, tick: &Tick) -> FeedResult<UpdateOutcome> {
        if tick.symbol != self.symbol {
            return Err(FeedError::SymbolMismatch {
                expected: self.symbol.clone(),
                got: tick.symbol.clone(),
            });
        }
        tick.validate()?;

        if let Some(last_seen) = self.last_seen {
            if tick.timestamp < last_seen - self.tolerance {
                return Err(FeedError::OutOfOrder {
                    symbol: self.symbol.clone(),
                    timestamp: tick.timestamp,
                    last_seen,
                });
            }
        }

        let mut outcome = UpdateOutcome::Applied;
        if let Some(hour) = self.session_reset_hour_utc {
            let key = session_key_at(tick.timestamp, hour);
            match self.session {
                Some(current) if current != key => {
                    self.reset_session();
                    outcome = UpdateOutcome::AppliedNewSession;
                }
                _ => {}
            }
            self.session = Some(key);
        }

        let price = tick.price;
        self.ema_fast.update(price);
        self.ema_slow.update(price);
        self.vwap.update(price, tick.volume);
        self.welford.update(price);
        self.rsi.update(price);
        self.atr.update(price);

        self.prior_volume_sma = self.volume_sma.mean();
        self.volume_sma.push(tick.volume);

        self.prev_price = self.last_price;
        self.last_price = Some(price);
        self.last_volume = tick.volume;
        self.last_seen = Some(match self.last_seen {
            Some(prev) if prev > tick.timestamp => prev,
            _ => tick.timestamp,
        });

        Ok(outcome)
    }

    /// Session boundary: VWAP accumulators return to zero.
    ///
    /// EMA, Welford and volume statistics are lifetime-rolling and untouched.
    pub fn reset_session(&mut self) {
        self.vwap.reset();
        self.sessions_reset += 1;
        debug!(symbol = %self.symbol, "VWAP session reset");
    }

    /// Record an emission and return the next per-symbol signal sequence.
    pub fn mark_signal(&mut self, at: DateTime<Utc>) -> u64 {
        self.last_signal_time = Some(at);
        self.signal_seq += 1;
        self.signal_seq
    }

    /// Snapshot for signal metadata. `None` before the first tick.
    pub fn meta(&self, sub_scores: SubScores) -> Option<SignalMeta> {
        Some(SignalMeta {
            price: self.last_price?,
            volume: self.last_volume,
            ema_fast: self.ema_fast.value()?,
            ema_slow: self.ema_slow.value()?,
            vwap: self.vwap.value(),
            volume_sma: self.prior_volume_sma,
            volatility: self.welford.stddev(),
            momentum: self.momentum(),
            rsi: self.rsi.value(),
            atr: self.atr.value(),
            tick_count: self.welford.count(),
            sub_scores,
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn ema_fast(&self) -> Option<f64> {
        self.ema_fast.value()
    }

    pub fn ema_slow(&self) -> Option<f64> {
        self.ema_slow.value()
    }

    pub fn vwap(&self) -> Option<f64> {
        self.vwap.value()
    }

    pub fn vwap_numerator(&self) -> f64 {
        self.vwap.numerator()
    }

    pub fn vwap_denominator(&self) -> f64 {
        self.vwap.denominator()
    }

    pub fn welford_mean(&self) -> Option<f64> {
        self.welford.mean()
    }

    pub fn welford_m2(&self) -> f64 {
        self.welford.m2()
    }

    pub fn welford_count(&self) -> u64 {
        self.welford.count()
    }

    /// Welford standard deviation of price.
    pub fn volatility(&self) -> Option<f64> {
        self.welford.stddev()
    }

    /// Volume SMA including the latest tick.
    pub fn volume_sma(&self) -> Option<f64> {
        self.volume_sma.mean()
    }

    /// Volume SMA of the window preceding the latest tick.
    pub fn prior_volume_sma(&self) -> Option<f64> {
        self.prior_volume_sma
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    pub fn prev_price(&self) -> Option<f64> {
        self.prev_price
    }

    pub fn last_volume(&self) -> f64 {
        self.last_volume
    }

    /// Fractional change from the previous tick; 0 on the first tick.
    pub fn momentum(&self) -> f64 {
        match (self.prev_price, self.last_price) {
            (Some(prev), Some(last)) if prev > 0.0 => (last - prev) / prev,
            _ => 0.0,
        }
    }

    pub fn rsi(&self) -> Option<f64> {
        self.rsi.value()
    }

    pub fn atr(&self) -> Option<f64> {
        self.atr.value()
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    pub fn last_signal_time(&self) -> Option<DateTime<Utc>> {
        self.last_signal_time
    }

    pub fn sessions_reset(&self) -> u64 {
        self.sessions_reset
    }
}

/// Symbol -> state map owned by a single worker.
#[derive(Debug)]
pub struct StateArena {
    config: StateConfig,
    states: HashMap<Symbol, SymbolState>,
}

impl StateArena {
    pub fn new(config: StateConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Route a tick to its symbol's state, creating it on first sight.
    ///
    /// Rejections are logged and counted here; callers only need to skip.
    pub fn apply(&mut self, tick: &Tick) -> FeedResult<&mut SymbolState> {
        let state = self
            .states
            .entry(tick.symbol.clone())
            .or_insert_with(|| SymbolState::new(tick.symbol.clone(), &self.config));

        match state.update(tick) {
            Ok(_) => {
                Metrics::tick_processed(tick.symbol.as_str());
                Ok(state)
            }
            Err(e @ FeedError::OutOfOrder { .. }) => {
                Metrics::tick_out_of_order(tick.symbol.as_str());
                debug!(symbol = %tick.symbol, error = %e, "Dropped out-of-order tick");
                Err(e)
            }
            Err(e) => {
                Metrics::tick_rejected(e.reason());
                warn!(symbol = %tick.symbol, error = %e, "Rejected tick");
                Err(e)
            }
        }
    }

    /// Session boundary for one symbol. Unknown symbols are ignored.
    pub fn reset_session(&mut self, symbol: &Symbol) {
        if let Some(state) = self.states.get_mut(symbol) {
            state.reset_session();
        }
    }

    /// Session boundary for every symbol held by this worker.
    pub fn reset_all_sessions(&mut self) {
        for state in self.states.values_mut() {
            state.reset_session();
        }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&SymbolState> {
        self.states.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &Symbol) -> Option<&mut SymbolState> {
        self.states.get_mut(symbol)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.states.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sym() -> Symbol {
        Symbol::new("AAPL").unwrap()
    }

    fn tick_at(ms: i64, price: f64, volume: f64) -> Tick {
        Tick::new(sym(), Utc.timestamp_millis_opt(ms).unwrap(), price, volume)
    }

    fn aapl_config() -> StateConfig {
        StateConfig {
            fast_alpha: Some(0.2),
            slow_alpha: Some(0.1),
            volume_window: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_valid() {
        let config = StateConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.fast_alpha() - 2.0 / 11.0).abs() < 1e-12);
        assert!((config.slow_alpha() - 2.0 / 21.0).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation() {
        let bad = StateConfig {
            fast_alpha: Some(0.05),
            slow_alpha: Some(0.1),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = StateConfig {
            volume_window: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = StateConfig {
            session_reset_hour_utc: Some(24),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_aapl_fast_ema_reference() {
        let prices = [100.0, 101.0, 99.0, 105.0, 110.0, 108.0];
        let volumes = [10.0, 10.0, 10.0, 50.0, 60.0, 40.0];
        let mut state = SymbolState::new(sym(), &aapl_config());

        let mut reference = prices[0];
        for (i, (&p, &v)) in prices.iter().zip(volumes.iter()).enumerate() {
            state.update(&tick_at(i as i64 * 1_000, p, v)).unwrap();
            if i > 0 {
                reference += 0.2 * (p - reference);
            }
            assert!((state.ema_fast().unwrap() - reference).abs() < 1e-12);
        }
        // 100, 100.2, 99.96, 100.968, 102.7744, 103.81952
        assert!((state.ema_fast().unwrap() - 103.81952).abs() < 1e-9);
    }

    #[test]
    fn test_first_tick_initializes() {
        let mut state = SymbolState::new(sym(), &StateConfig::default());
        assert_eq!(state.ema_fast(), None);
        state.update(&tick_at(0, 50.0, 1.0)).unwrap();
        assert_eq!(state.ema_fast(), Some(50.0));
        assert_eq!(state.ema_slow(), Some(50.0));
        assert_eq!(state.welford_count(), 1);
        assert_eq!(state.volatility(), None);
        assert_eq!(state.prior_volume_sma(), None);
        assert_eq!(state.momentum(), 0.0);
    }

    #[test]
    fn test_vwap_matches_recomputation_and_resets_once() {
        let mut state = SymbolState::new(sym(), &StateConfig::default());
        let history = [(100.0, 5.0), (102.0, 15.0), (98.0, 10.0)];
        for (i, &(p, v)) in history.iter().enumerate() {
            state.update(&tick_at(i as i64, p, v)).unwrap();
        }
        let expected = history.iter().map(|(p, v)| p * v).sum::<f64>()
            / history.iter().map(|(_, v)| v).sum::<f64>();
        assert!((state.vwap().unwrap() - expected).abs() < 1e-12);

        state.reset_session();
        assert_eq!(state.vwap(), None);
        assert_eq!(state.sessions_reset(), 1);
        // Lifetime statistics survive the session boundary
        assert_eq!(state.welford_count(), 3);

        state.update(&tick_at(10, 120.0, 2.0)).unwrap();
        assert_eq!(state.vwap(), Some(120.0));
        assert_eq!(state.sessions_reset(), 1);
    }

    #[test]
    fn test_automatic_session_roll() {
        let config = StateConfig {
            session_reset_hour_utc: Some(0),
            ..Default::default()
        };
        let mut state = SymbolState::new(sym(), &config);
        let day1 = Utc.with_ymd_and_hms(2024, 3, 4, 20, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap();

        let t1 = Tick::new(sym(), day1, 100.0, 10.0);
        let t2 = Tick::new(sym(), day1 + Duration::minutes(1), 110.0, 10.0);
        let t3 = Tick::new(sym(), day2, 200.0, 1.0);

        assert_eq!(state.update(&t1).unwrap(), UpdateOutcome::Applied);
        assert_eq!(state.update(&t2).unwrap(), UpdateOutcome::Applied);
        assert_eq!(state.vwap(), Some(105.0));
        assert_eq!(state.update(&t3).unwrap(), UpdateOutcome::AppliedNewSession);
        assert_eq!(state.vwap(), Some(200.0));
        assert_eq!(state.sessions_reset(), 1);
    }

    #[test]
    fn test_malformed_tick_leaves_state_untouched() {
        let mut state = SymbolState::new(sym(), &StateConfig::default());
        state.update(&tick_at(0, 100.0, 1.0)).unwrap();

        assert!(matches!(
            state.update(&tick_at(1, -1.0, 1.0)),
            Err(FeedError::MalformedInput(_))
        ));
        assert!(matches!(
            state.update(&tick_at(1, 100.0, 0.0)),
            Err(FeedError::MalformedInput(_))
        ));
        assert_eq!(state.welford_count(), 1);
        assert_eq!(state.last_price(), Some(100.0));
    }

    #[test]
    fn test_out_of_order_dropped() {
        let mut state = SymbolState::new(sym(), &StateConfig::default());
        state.update(&tick_at(1_000, 100.0, 1.0)).unwrap();
        let err = state.update(&tick_at(999, 101.0, 1.0)).unwrap_err();
        assert!(matches!(err, FeedError::OutOfOrder { .. }));
        assert_eq!(state.welford_count(), 1);

        // Equal timestamps are in order
        state.update(&tick_at(1_000, 101.0, 1.0)).unwrap();
        assert_eq!(state.welford_count(), 2);
    }

    #[test]
    fn test_out_of_order_tolerance() {
        let config = StateConfig {
            out_of_order_tolerance_ms: 50,
            ..Default::default()
        };
        let mut state = SymbolState::new(sym(), &config);
        state.update(&tick_at(1_000, 100.0, 1.0)).unwrap();
        state.update(&tick_at(960, 100.5, 1.0)).unwrap();
        // Late tick does not move the reference backwards
        assert_eq!(state.last_seen().unwrap().timestamp_millis(), 1_000);
        assert!(state.update(&tick_at(940, 100.5, 1.0)).is_err());
    }

    #[test]
    fn test_prior_volume_sma_excludes_current_tick() {
        let mut state = SymbolState::new(sym(), &aapl_config());
        for (i, v) in [10.0, 10.0, 10.0, 50.0].into_iter().enumerate() {
            state.update(&tick_at(i as i64, 100.0, v)).unwrap();
        }
        assert_eq!(state.prior_volume_sma(), Some(10.0));
        assert!((state.volume_sma().unwrap() - 70.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_symbol_mismatch() {
        let mut state = SymbolState::new(sym(), &StateConfig::default());
        let other = Tick::new(
            Symbol::new("MSFT").unwrap(),
            Utc.timestamp_millis_opt(0).unwrap(),
            1.0,
            1.0,
        );
        assert!(matches!(
            state.update(&other),
            Err(FeedError::SymbolMismatch { .. })
        ));
    }

    #[test]
    fn test_mark_signal_sequence() {
        let mut state = SymbolState::new(sym(), &StateConfig::default());
        let t = Utc.timestamp_millis_opt(5).unwrap();
        assert_eq!(state.mark_signal(t), 1);
        assert_eq!(state.mark_signal(t), 2);
        assert_eq!(state.last_signal_time(), Some(t));
    }

    #[test]
    fn test_arena_isolates_symbols() {
        let mut arena = StateArena::new(StateConfig::default());
        let msft = Symbol::new("MSFT").unwrap();
        arena.apply(&tick_at(0, 100.0, 1.0)).unwrap();
        arena
            .apply(&Tick::new(
                msft.clone(),
                Utc.timestamp_millis_opt(0).unwrap(),
                300.0,
                2.0,
            ))
            .unwrap();
        assert_eq!(arena.len(), 2);

        arena.reset_session(&msft);
        assert_eq!(arena.get(&msft).unwrap().vwap(), None);
        assert_eq!(arena.get(&sym()).unwrap().vwap(), Some(100.0));

        arena.reset_all_sessions();
        assert_eq!(arena.get(&sym()).unwrap().vwap(), None);
    }

    #[test]
    fn test_meta_snapshot() {
        let mut state = SymbolState::new(sym(), &aapl_config());
        assert!(state.meta(SubScores::default()).is_none());
        state.update(&tick_at(0, 100.0, 10.0)).unwrap();
        state.update(&tick_at(1, 101.0, 10.0)).unwrap();
        let meta = state.meta(SubScores::default()).unwrap();
        assert_eq!(meta.price, 101.0);
        assert_eq!(meta.tick_count, 2);
        assert!((meta.momentum - 0.01).abs() < 1e-12);
        assert!(meta.volatility.is_some());
    }
}
