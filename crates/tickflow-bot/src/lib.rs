//! tickflow application.
//!
//! Orchestrates the streaming pipeline:
//! - Tick routing to symbol workers (state engine + detector)
//! - Signal bus with a decision worker consumer group
//! - Inference race, sentiment cache and sizing in the decision engine
//! - Order bus publishing
//! - `/metrics` and `/health` endpoints

pub mod app;
pub mod config;
pub mod error;
pub mod server;
pub mod symbol_worker;

pub use app::{partition_plan, replay_file, Application, Pipeline};
pub use config::{AppConfig, ReplayConfig, TelemetryConfig, WorkersConfig};
pub use error::{AppError, AppResult};
pub use server::{HealthReport, ServerState};
pub use symbol_worker::{publish_signal, SymbolWorker, TickRouter, WorkerInput, WorkerSummary};
