//! Inference backend abstraction.

use std::future::Future;
use std::pin::Pin;
use tickflow_core::{BackendKind, InferenceRequest, InferenceResult};

use crate::error::InferResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A model server that answers inference requests.
///
/// Implementations must be cancel-safe: the orchestrator drops the losing
/// call's future as soon as a winner is known.
pub trait InferenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn infer<'a>(
        &'a self,
        request: &'a InferenceRequest,
    ) -> BoxFuture<'a, InferResult<InferenceResult>>;

    /// Cheap liveness check, used at startup.
    fn health_check(&self) -> BoxFuture<'_, InferResult<()>>;
}
