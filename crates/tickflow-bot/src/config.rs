//! Application configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tickflow_bus::BusConfig;
use tickflow_decision::{DecisionConfig, SentimentConfig};
use tickflow_detector::DetectorConfig;
use tickflow_feed::StateConfig;
use tickflow_inference::InferenceConfig;

use crate::error::{AppError, AppResult};

fn default_symbol_workers() -> usize {
    4
}

fn default_decision_workers() -> usize {
    2
}

fn default_channel_capacity() -> usize {
    4096
}

/// Worker pool sizing and symbol placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Symbol workers (state engine + detector). Each symbol is owned by one.
    #[serde(default = "default_symbol_workers")]
    pub symbol_workers: usize,

    /// Decision workers in the signal consumer group.
    #[serde(default = "default_decision_workers")]
    pub decision_workers: usize,

    /// Tick queue depth per symbol worker.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Relative load of known-hot symbols. When non-empty, symbols are
    /// bin-packed by weight instead of hashed.
    #[serde(default)]
    pub hot_symbols: BTreeMap<String, f64>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            symbol_workers: default_symbol_workers(),
            decision_workers: default_decision_workers(),
            channel_capacity: default_channel_capacity(),
            hot_symbols: BTreeMap::new(),
        }
    }
}

impl WorkersConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol_workers == 0 || self.decision_workers == 0 {
            return Err("symbol_workers and decision_workers must be > 0".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be > 0".to_string());
        }
        if let Some((symbol, weight)) = self
            .hot_symbols
            .iter()
            .find(|(_, w)| !w.is_finite() || **w <= 0.0)
        {
            return Err(format!("hot symbol {symbol} has invalid weight {weight}"));
        }
        Ok(())
    }
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_stats_interval_secs() -> u64 {
    60
}

/// Metrics server and periodic summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Interval between stats summaries in the log.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            bind_address: default_bind_address(),
            metrics_port: default_metrics_port(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.stats_interval_secs == 0 {
            return Err("stats_interval_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// CSV tick replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// File to replay at startup. No replay when unset.
    #[serde(default)]
    pub path: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub sentiment: SentimentConfig,

    #[serde(default)]
    pub decision: DecisionConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub replay: ReplayConfig,
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Validate every section, naming the first one that fails.
    pub fn validate(&self) -> AppResult<()> {
        let sections: [(&str, Result<(), String>); 8] = [
            ("state", self.state.validate()),
            ("detector", self.detector.validate()),
            ("bus", self.bus.validate()),
            ("inference", self.inference.validate()),
            ("sentiment", self.sentiment.validate()),
            ("decision", self.decision.validate()),
            ("workers", self.workers.validate()),
            ("telemetry", self.telemetry.validate()),
        ];
        for (name, result) in sections {
            result.map_err(|e| AppError::Config(format!("[{name}] {e}")))?;
        }
        Ok(())
    }
}
