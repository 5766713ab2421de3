//! HTTP inference backend.
//!
//! Both model servers expose the same contract:
//! `POST {base}/infer` with `{symbol, feature_vector, horizon}` returning
//! `{prediction, confidence, backend, latency_ms}`, and `GET {base}/health`.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tickflow_core::{BackendKind, InferenceRequest, InferenceResult};
use tracing::debug;

use crate::backend::{BoxFuture, InferenceBackend};
use crate::error::{InferResult, InferenceError};

#[derive(Debug, Deserialize)]
struct InferResponse {
    prediction: f64,
    confidence: f64,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    latency_ms: Option<u64>,
}

pub struct HttpBackend {
    kind: BackendKind,
    client: Client,
    infer_url: String,
    health_url: String,
}

impl HttpBackend {
    pub fn new(kind: BackendKind, base_url: &str, timeout: Duration) -> InferResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::HttpClient(format!("Failed to create HTTP client: {e}")))?;
        let base = base_url.trim_end_matches('/');

        Ok(Self {
            kind,
            client,
            infer_url: format!("{base}/infer"),
            health_url: format!("{base}/health"),
        })
    }

    async fn post_infer(&self, request: &InferenceRequest) -> InferResult<InferenceResult> {
        let response = self
            .client
            .post(&self.infer_url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.failure(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("HTTP {status}: {body}")));
        }

        let body: InferResponse = response
            .json()
            .await
            .map_err(|e| self.failure(format!("Failed to parse response: {e}")))?;

        if !body.prediction.is_finite() || !body.confidence.is_finite() {
            return Err(self.failure("non-finite prediction".to_string()));
        }

        debug!(
            backend = %self.kind,
            reported_backend = ?body.backend,
            prediction = body.prediction,
            confidence = body.confidence,
            "Inference response"
        );

        Ok(InferenceResult {
            symbol: request.symbol.clone(),
            backend: self.kind,
            latency_ms: body.latency_ms.unwrap_or(0),
            prediction: body.prediction,
            confidence: body.confidence,
        })
    }

    async fn get_health(&self) -> InferResult<()> {
        let response = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| self.failure(format!("Health check failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.failure(format!("Health check HTTP {}", response.status())))
        }
    }

    fn failure(&self, reason: String) -> InferenceError {
        InferenceError::Backend {
            backend: self.kind,
            reason,
        }
    }
}

impl InferenceBackend for HttpBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn infer<'a>(
        &'a self,
        request: &'a InferenceRequest,
    ) -> BoxFuture<'a, InferResult<InferenceResult>> {
        Box::pin(self.post_infer(request))
    }

    fn health_check(&self) -> BoxFuture<'_, InferResult<()>> {
        Box::pin(self.get_health())
    }
}
