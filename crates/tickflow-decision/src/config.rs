//! Decision engine and sentiment settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tickflow_bus::GLOBAL_SIGNAL_STREAM;

use crate::error::{DecisionError, DecisionResult};

const WEIGHT_TOLERANCE: f64 = 1e-6;

fn default_signal_weight() -> f64 {
    0.5
}

fn default_inference_weight() -> f64 {
    0.3
}

fn default_sentiment_weight() -> f64 {
    0.2
}

fn default_min_signal_threshold() -> f64 {
    0.3
}

fn default_account_equity() -> f64 {
    100_000.0
}

fn default_risk_limit() -> f64 {
    0.01
}

fn default_max_position() -> f64 {
    1_000.0
}

fn default_max_fraction_of_equity() -> f64 {
    0.1
}

fn default_fallback_volatility_pct() -> f64 {
    0.01
}

fn default_quantity_decimals() -> u32 {
    0
}

fn default_processing_budget_ms() -> u64 {
    500
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_source_stream() -> String {
    GLOBAL_SIGNAL_STREAM.to_string()
}

fn default_consumer_group() -> String {
    "decision".to_string()
}

/// Combination weights, risk limits and consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_signal_weight")]
    pub signal_weight: f64,

    #[serde(default = "default_inference_weight")]
    pub inference_weight: f64,

    #[serde(default = "default_sentiment_weight")]
    pub sentiment_weight: f64,

    /// Decisions with `|combined|` below this are discarded.
    #[serde(default = "default_min_signal_threshold")]
    pub min_signal_threshold: f64,

    #[serde(default = "default_account_equity")]
    pub account_equity: f64,

    /// Fraction of equity put at risk per decision.
    #[serde(default = "default_risk_limit")]
    pub risk_limit: f64,

    /// Hard cap on quantity.
    #[serde(default = "default_max_position")]
    pub max_position: f64,

    /// Notional cap as a fraction of equity.
    #[serde(default = "default_max_fraction_of_equity")]
    pub max_fraction_of_equity: f64,

    /// Volatility assumed as a fraction of price when the signal carries none.
    #[serde(default = "default_fallback_volatility_pct")]
    pub fallback_volatility_pct: f64,

    /// Quantity precision; sizes are rounded down.
    #[serde(default = "default_quantity_decimals")]
    pub quantity_decimals: u32,

    /// End-to-end budget per signal; work past it is abandoned unacked.
    #[serde(default = "default_processing_budget_ms")]
    pub processing_budget_ms: u64,

    /// Size of the processed-signal id set.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    #[serde(default = "default_source_stream")]
    pub source_stream: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            signal_weight: default_signal_weight(),
            inference_weight: default_inference_weight(),
            sentiment_weight: default_sentiment_weight(),
            min_signal_threshold: default_min_signal_threshold(),
            account_equity: default_account_equity(),
            risk_limit: default_risk_limit(),
            max_position: default_max_position(),
            max_fraction_of_equity: default_max_fraction_of_equity(),
            fallback_volatility_pct: default_fallback_volatility_pct(),
            quantity_decimals: default_quantity_decimals(),
            processing_budget_ms: default_processing_budget_ms(),
            dedup_capacity: default_dedup_capacity(),
            source_stream: default_source_stream(),
            consumer_group: default_consumer_group(),
        }
    }
}

impl DecisionConfig {
    pub fn validate(&self) -> Result<(), String> {
        let weights = [self.signal_weight, self.inference_weight, self.sentiment_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("combination weights must be finite and >= 0".to_string());
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(format!("combination weights must sum to 1, got {sum}"));
        }
        if !(0.0..=1.0).contains(&self.min_signal_threshold) {
            return Err("min_signal_threshold must be in [0, 1]".to_string());
        }
        if self.account_equity <= 0.0 || self.max_position <= 0.0 {
            return Err("account_equity and max_position must be > 0".to_string());
        }
        if self.risk_limit <= 0.0 || self.risk_limit > 1.0 {
            return Err("risk_limit must be in (0, 1]".to_string());
        }
        if self.max_fraction_of_equity <= 0.0 || self.max_fraction_of_equity > 1.0 {
            return Err("max_fraction_of_equity must be in (0, 1]".to_string());
        }
        if self.fallback_volatility_pct <= 0.0 {
            return Err("fallback_volatility_pct must be > 0".to_string());
        }
        if self.processing_budget_ms == 0 || self.dedup_capacity == 0 {
            return Err("processing_budget_ms and dedup_capacity must be > 0".to_string());
        }
        if self.consumer_group.is_empty() || self.source_stream.is_empty() {
            return Err("source_stream and consumer_group must be set".to_string());
        }
        Ok(())
    }

    pub fn checked(self) -> DecisionResult<Self> {
        self.validate().map_err(DecisionError::InvalidConfig)?;
        Ok(self)
    }

    pub fn processing_budget(&self) -> Duration {
        Duration::from_millis(self.processing_budget_ms)
    }
}

fn default_sentiment_enabled() -> bool {
    true
}

fn default_sentiment_url() -> String {
    "http://127.0.0.1:8003".to_string()
}

fn default_ttl_secs() -> i64 {
    300
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_sentiment_timeout_ms() -> u64 {
    2_000
}

/// Sentiment collaborator and cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentConfig {
    /// When false no refresher runs and sentiment never contributes.
    #[serde(default = "default_sentiment_enabled")]
    pub enabled: bool,

    #[serde(default = "default_sentiment_url")]
    pub base_url: String,

    /// Snapshots older than this are treated as missing.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_sentiment_timeout_ms")]
    pub http_timeout_ms: u64,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            enabled: default_sentiment_enabled(),
            base_url: default_sentiment_url(),
            ttl_secs: default_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            http_timeout_ms: default_sentiment_timeout_ms(),
        }
    }
}

impl SentimentConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_secs <= 0 {
            return Err("sentiment ttl_secs must be > 0".to_string());
        }
        if self.enabled && (self.base_url.is_empty() || self.refresh_interval_secs == 0) {
            return Err("sentiment base_url and refresh_interval_secs must be set".to_string());
        }
        Ok(())
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
