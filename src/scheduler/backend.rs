//! Inference backend seam

use async_trait::async_trait;

use super::request::BatchRequest;
use super::{SchedulerError, SchedulerResult};

/// Result of one batched inference call.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One output per request, in batch order
    pub outputs: Vec<String>,
    /// Latency the backend attributes to the batch, milliseconds
    pub model_latency_ms: f64,
}

/// The shared inference service every priority class drains into.
///
/// The scheduler treats the backend as opaque and serializes batches
/// through it; concurrency behind this seam is the backend's business.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one batch. An `Err` fails every request in the batch.
    async fn infer_batch(&self, requests: &[BatchRequest]) -> SchedulerResult<BatchOutcome>;
}

/// Stand-in backend for deployments not yet wired to a real model.
///
/// Latency is synthesized as
/// `base + batch_size * per_request + avg_tokens * per_token` and the
/// outputs are placeholders. Select it explicitly via
/// [`super::AdaptiveBatchScheduler::with_simulated_backend`]; it is
/// never chosen implicitly.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    /// Fixed per-batch cost, milliseconds
    pub base_latency_ms: f64,
    /// Cost per request in the batch, milliseconds
    pub per_request_ms: f64,
    /// Cost per average output token, milliseconds
    pub per_token_ms: f64,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self {
            base_latency_ms: 5.0,
            per_request_ms: 1.0,
            per_token_ms: 0.1,
        }
    }
}

impl SimulatedBackend {
    /// Simulated backend with explicit cost coefficients.
    pub fn new(base_latency_ms: f64, per_request_ms: f64, per_token_ms: f64) -> Self {
        Self {
            base_latency_ms,
            per_request_ms,
            per_token_ms,
        }
    }
}

#[async_trait]
impl InferenceBackend for SimulatedBackend {
    async fn infer_batch(&self, requests: &[BatchRequest]) -> SchedulerResult<BatchOutcome> {
        if requests.is_empty() {
            return Err(SchedulerError::Backend("empty batch".to_string()));
        }

        let avg_tokens = requests
            .iter()
            .map(|r| f64::from(r.request.max_tokens))
            .sum::<f64>()
            / requests.len() as f64;

        let latency_ms = self.base_latency_ms
            + requests.len() as f64 * self.per_request_ms
            + avg_tokens * self.per_token_ms;

        tokio::time::sleep(std::time::Duration::from_secs_f64(latency_ms / 1000.0)).await;

        let outputs = requests
            .iter()
            .map(|r| format!("[simulated output for {}]", r.request.request_id))
            .collect();

        Ok(BatchOutcome {
            outputs,
            model_latency_ms: latency_ms,
        })
    }
}
