//! Bus configuration.

use serde::{Deserialize, Serialize};

fn default_lease_timeout_ms() -> u64 {
    5_000
}

fn default_max_stream_len() -> usize {
    100_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    200
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_unhealthy_after() -> u32 {
    3
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_read_batch() -> usize {
    16
}

fn default_read_block_ms() -> u64 {
    100
}

/// Bus, producer and consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Un-acked entries are redelivered after this long.
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,

    /// Oldest entries are trimmed beyond this length. Pending entries survive
    /// trimming.
    #[serde(default = "default_max_stream_len")]
    pub max_stream_len: usize,

    /// Append retries before falling back to the local buffer.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Producer-local buffer capacity; oldest entries drop when full.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Consecutive exhausted writes before the producer reports unhealthy.
    #[serde(default = "default_unhealthy_after")]
    pub unhealthy_after: u32,

    /// Size of the recently-seen id sets.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    #[serde(default = "default_read_batch")]
    pub read_batch: usize,

    /// How long a group read waits for new entries.
    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            lease_timeout_ms: default_lease_timeout_ms(),
            max_stream_len: default_max_stream_len(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            buffer_capacity: default_buffer_capacity(),
            unhealthy_after: default_unhealthy_after(),
            dedup_capacity: default_dedup_capacity(),
            read_batch: default_read_batch(),
            read_block_ms: default_read_block_ms(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.lease_timeout_ms == 0 {
            return Err("lease_timeout_ms must be > 0".to_string());
        }
        if self.max_stream_len == 0 {
            return Err("max_stream_len must be > 0".to_string());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(format!(
                "base_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        if self.buffer_capacity == 0 || self.dedup_capacity == 0 || self.read_batch == 0 {
            return Err("buffer_capacity, dedup_capacity and read_batch must be > 0".to_string());
        }
        if self.unhealthy_after == 0 {
            return Err("unhealthy_after must be > 0".to_string());
        }
        Ok(())
    }

    /// Backoff before retry `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_valid() {
        assert!(BusConfig::default().validate().is_ok());
    }

    #[test]
    fn test_backoff_bounded() {
        let config = BusConfig::default();
        assert_eq!(config.backoff_ms(0), 10);
        assert_eq!(config.backoff_ms(1), 20);
        assert_eq!(config.backoff_ms(3), 80);
        assert_eq!(config.backoff_ms(10), 200);
        assert_eq!(config.backoff_ms(u32::MAX), 200);
    }

    #[test]
    fn test_invalid_delays() {
        let config = BusConfig {
            base_delay_ms: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
