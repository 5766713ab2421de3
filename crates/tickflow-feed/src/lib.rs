//! Per-symbol state engine for tickflow.
//!
//! Maintains O(1)-per-tick streaming statistics for each symbol:
//! - fast/slow EMA, session VWAP, Welford mean/variance of price
//! - ring-buffer volume SMA, Wilder RSI and tick-to-tick ATR
//!
//! Also provides CSV tick replay and symbol-to-worker partitioning.

pub mod error;
pub mod indicators;
pub mod partition;
pub mod replay;
pub mod symbol_state;

pub use error::{FeedError, FeedResult};
pub use indicators::{Ema, RollingSma, Vwap, Welford, WilderAtr, WilderRsi};
pub use partition::{assign_weighted, hash_partition, stable_hash, PartitionPlan};
pub use replay::{parse_line, ReplayStats, TickReader};
pub use symbol_state::{StateArena, StateConfig, SymbolState, UpdateOutcome};
