//! Detector configuration.

use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, DetectorResult};

/// Configuration for signal detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Emit only when `|score|` is strictly greater than this.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Minimum time between two signals for the same symbol.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: i64,

    #[serde(default = "default_ema_weight")]
    pub ema_weight: f64,

    #[serde(default = "default_vwap_weight")]
    pub vwap_weight: f64,

    #[serde(default = "default_volume_weight")]
    pub volume_weight: f64,

    /// Weight of the volatility-breakout overlay. Added on top of the three
    /// weights above, which alone must sum to 1.
    #[serde(default = "default_breakout_weight")]
    pub breakout_weight: f64,

    /// Breakout band in standard deviations of price around the fast EMA.
    #[serde(default = "default_breakout_sigma")]
    pub breakout_sigma: f64,

    /// Ticks required before a breakout can score.
    #[serde(default = "default_breakout_min_ticks")]
    pub breakout_min_ticks: u64,

    /// Multiplier applied to the relative EMA gap before clipping.
    /// 50 maps a 2% gap to a full-strength sub-score.
    #[serde(default = "default_ema_scale")]
    pub ema_scale: f64,

    /// VWAP z-score clip.
    #[serde(default = "default_z_clip")]
    pub z_clip: f64,

    /// Volume ratio clip.
    #[serde(default = "default_volume_spike_cap")]
    pub volume_spike_cap: f64,

    /// Ticks required before any signal.
    #[serde(default = "default_min_ticks")]
    pub min_ticks: u64,

    /// Ticks after which confidence is no longer scaled down.
    #[serde(default = "default_warmup_ticks")]
    pub warmup_ticks: u64,

    /// Share of the absolute weighted total a sub-score needs to name the
    /// pattern; otherwise the signal is `composite`.
    #[serde(default = "default_dominance_share")]
    pub dominance_share: f64,
}

fn default_threshold() -> f64 {
    0.3
}

fn default_cooldown_ms() -> i64 {
    30_000
}

fn default_ema_weight() -> f64 {
    0.5
}

fn default_vwap_weight() -> f64 {
    0.3
}

fn default_volume_weight() -> f64 {
    0.2
}

fn default_breakout_weight() -> f64 {
    0.2
}

fn default_breakout_sigma() -> f64 {
    2.0
}

fn default_breakout_min_ticks() -> u64 {
    6
}

fn default_ema_scale() -> f64 {
    50.0
}

fn default_z_clip() -> f64 {
    3.0
}

fn default_volume_spike_cap() -> f64 {
    2.0
}

fn default_min_ticks() -> u64 {
    2
}

fn default_warmup_ticks() -> u64 {
    20
}

fn default_dominance_share() -> f64 {
    0.5
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            cooldown_ms: default_cooldown_ms(),
            ema_weight: default_ema_weight(),
            vwap_weight: default_vwap_weight(),
            volume_weight: default_volume_weight(),
            breakout_weight: default_breakout_weight(),
            breakout_sigma: default_breakout_sigma(),
            breakout_min_ticks: default_breakout_min_ticks(),
            ema_scale: default_ema_scale(),
            z_clip: default_z_clip(),
            volume_spike_cap: default_volume_spike_cap(),
            min_ticks: default_min_ticks(),
            warmup_ticks: default_warmup_ticks(),
            dominance_share: default_dominance_share(),
        }
    }
}

impl DetectorConfig {
    /// Validate configuration values.
    ///
    /// Weights must be non-negative and sum to 1, the threshold must lie in
    /// [0, 1), and every clip/scale must be positive.
    pub fn validate(&self) -> Result<(), String> {
        let weights = [self.ema_weight, self.vwap_weight, self.volume_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(format!("weights must be non-negative, got {weights:?}"));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(format!("weights must sum to 1.0, got {sum}"));
        }

        if !(self.breakout_weight.is_finite() && (0.0..=1.0).contains(&self.breakout_weight)) {
            return Err(format!(
                "breakout_weight ({}) must be in [0, 1]",
                self.breakout_weight
            ));
        }

        if !(0.0..1.0).contains(&self.threshold) {
            return Err(format!(
                "threshold ({}) must be in [0, 1)",
                self.threshold
            ));
        }

        if self.cooldown_ms < 0 {
            return Err(format!(
                "cooldown_ms ({}) must be non-negative",
                self.cooldown_ms
            ));
        }

        for (name, v) in [
            ("ema_scale", self.ema_scale),
            ("z_clip", self.z_clip),
            ("volume_spike_cap", self.volume_spike_cap),
            ("breakout_sigma", self.breakout_sigma),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(format!("{name} ({v}) must be positive"));
            }
        }

        if !(self.dominance_share > 0.0 && self.dominance_share <= 1.0) {
            return Err(format!(
                "dominance_share ({}) must be in (0, 1]",
                self.dominance_share
            ));
        }

        Ok(())
    }

    /// [`Self::validate`] as a typed error.
    pub fn checked(self) -> DetectorResult<Self> {
        self.validate().map_err(DetectorError::ConfigError)?;
        Ok(self)
    }
}
