//! Feed error types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tickflow_core::{CoreError, Symbol};

#[derive(Debug, Error)]
pub enum FeedError {
    /// Tick failed validation. Skipped, never fatal.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Tick older than the last accepted tick minus tolerance. Dropped.
    #[error("Out of order tick for {symbol}: {timestamp} < {last_seen}")]
    OutOfOrder {
        symbol: Symbol,
        timestamp: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    },

    #[error("Tick for {got} routed to state of {expected}")]
    SymbolMismatch { expected: Symbol, got: Symbol },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for FeedError {
    fn from(e: CoreError) -> Self {
        Self::MalformedInput(e.to_string())
    }
}

impl FeedError {
    /// Label for the rejected-ticks counter.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed",
            Self::OutOfOrder { .. } => "out_of_order",
            Self::SymbolMismatch { .. } => "symbol_mismatch",
            Self::InvalidConfig(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
