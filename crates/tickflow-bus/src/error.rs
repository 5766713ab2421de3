//! Bus error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// The bus rejected or could not take the write.
    #[error("Bus write failed on {stream}: {reason}")]
    WriteFailure { stream: String, reason: String },

    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown consumer group {group} on {stream}")]
    UnknownGroup { stream: String, group: String },

    /// The entry was reclaimed by another consumer after the lease expired.
    #[error("Lease expired for entry {entry_id} ({consumer} on {stream}/{group})")]
    LeaseExpired {
        stream: String,
        group: String,
        consumer: String,
        entry_id: String,
    },

    #[error("Payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BusError {
    /// Whether a retry can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteFailure { .. } | Self::Unavailable(_))
    }
}

pub type BusResult<T> = Result<T, BusError>;
