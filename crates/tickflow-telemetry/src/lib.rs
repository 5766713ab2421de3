//! Prometheus metrics and structured logging for tickflow.
//!
//! Provides observability for every pipeline stage:
//! - Prometheus metrics for ticks, signals, bus health, inference, orders
//! - Structured JSON logging with tracing
//! - Text exposition for the `/metrics` endpoint
//! - Periodic statistics summary read back from the registry

pub mod error;
pub mod logging;
pub mod metrics;
pub mod stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{render, Metrics};
pub use stats::{PipelineStats, StatsReporter, SymbolStats};
