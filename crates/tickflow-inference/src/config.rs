//! Inference orchestration settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_deadline_ms() -> u64 {
    200
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_success_threshold() -> u32 {
    1
}

fn default_gpu_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_cpu_url() -> String {
    "http://127.0.0.1:8002".to_string()
}

fn default_http_timeout_ms() -> u64 {
    1_000
}

fn default_horizon() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Hard deadline shared by both racing calls.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Consecutive failures that open a backend's circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open circuit skips its backend before a probe.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Successful probes needed to close a half-open circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_gpu_url")]
    pub gpu_url: String,

    #[serde(default = "default_cpu_url")]
    pub cpu_url: String,

    /// Transport timeout for the HTTP client. The race deadline is
    /// normally the tighter bound.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Forecast horizon sent with every request.
    #[serde(default = "default_horizon")]
    pub horizon: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            success_threshold: default_success_threshold(),
            gpu_url: default_gpu_url(),
            cpu_url: default_cpu_url(),
            http_timeout_ms: default_http_timeout_ms(),
            horizon: default_horizon(),
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.deadline_ms == 0 {
            return Err("deadline_ms must be > 0".to_string());
        }
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err("failure_threshold and success_threshold must be > 0".to_string());
        }
        if self.gpu_url.is_empty() || self.cpu_url.is_empty() {
            return Err("gpu_url and cpu_url must be set".to_string());
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
