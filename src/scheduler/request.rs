//! Request types and completion plumbing

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Priority class of a request. Smaller value drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestPriority {
    /// Real-time decisions (soldier class)
    Critical = 1,
    /// Strategy analysis (commander class)
    High = 2,
    /// Research workloads (scholar class)
    Normal = 3,
    /// Everything else
    Low = 4,
}

impl RequestPriority {
    /// All classes, highest priority first.
    pub const ALL: [RequestPriority; 4] = [
        RequestPriority::Critical,
        RequestPriority::High,
        RequestPriority::Normal,
        RequestPriority::Low,
    ];

    /// Zero-based class index.
    pub fn class_index(self) -> usize {
        self as usize - 1
    }

    /// Upper-case class name, as reported in statistics.
    pub fn name(self) -> &'static str {
        match self {
            RequestPriority::Critical => "CRITICAL",
            RequestPriority::High => "HIGH",
            RequestPriority::Normal => "NORMAL",
            RequestPriority::Low => "LOW",
        }
    }

    /// Queue bound for the class. Higher-priority queues are kept small
    /// so admitted requests stay fresh.
    pub fn max_queue_size(self) -> usize {
        match self {
            RequestPriority::Critical => 100,
            RequestPriority::High => 200,
            RequestPriority::Normal => 500,
            RequestPriority::Low => 1000,
        }
    }

    /// Derive a class from the submitting module's tag.
    ///
    /// Case-insensitive substring match: "soldier" outranks "commander"
    /// outranks "scholar"; anything else is background work.
    pub fn from_source_tag(source_module: &str) -> Self {
        let tag = source_module.to_lowercase();
        if tag.contains("soldier") {
            RequestPriority::Critical
        } else if tag.contains("commander") {
            RequestPriority::High
        } else if tag.contains("scholar") {
            RequestPriority::Normal
        } else {
            RequestPriority::Low
        }
    }
}

impl fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A unit of inference work offered to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Caller-chosen id, opaque to the scheduler
    pub request_id: String,
    /// Tag of the originating engine; used only for priority derivation
    pub source_module: String,
    /// Prompt text
    pub prompt: String,
    /// Output budget
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Time budget in milliseconds; the class default applies when absent
    pub deadline_ms: Option<f64>,
    /// Caller metadata, passed through untouched
    pub metadata: serde_json::Value,
}

impl InferenceRequest {
    /// Create a request with default generation parameters.
    pub fn new(
        request_id: impl Into<String>,
        source_module: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            source_module: source_module.into(),
            prompt: prompt.into(),
            max_tokens: 100,
            temperature: 0.7,
            deadline_ms: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set the output budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set an explicit deadline in milliseconds.
    pub fn with_deadline_ms(mut self, deadline_ms: f64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Attach caller metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Terminal state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    /// Dispatched and answered by the backend
    Success,
    /// The backend rejected the batch
    Error,
    /// The deadline passed before dispatch
    Timeout,
}

/// Outcome delivered once per submitted request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Echoed request id
    pub request_id: String,
    /// Terminal state
    pub status: CompletionStatus,
    /// Outcome details: `latency_ms` and `output` on success, `error`
    /// on backend failure, `reason` on timeout
    pub metadata: serde_json::Value,
}

/// Awaitable receipt returned by `submit`.
///
/// The scheduler completes every accepted request exactly once; callers
/// either await the handle or drop it to discard the outcome.
#[derive(Debug)]
pub struct CompletionHandle {
    request_id: String,
    receiver: oneshot::Receiver<Completion>,
}

impl CompletionHandle {
    pub(crate) fn new(request_id: String, receiver: oneshot::Receiver<Completion>) -> Self {
        Self {
            request_id,
            receiver,
        }
    }

    /// Id of the request this handle tracks.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the request's terminal state.
    pub async fn wait(self) -> Completion {
        match self.receiver.await {
            Ok(completion) => completion,
            // Only reachable if the scheduler is dropped wholesale with
            // the request still queued.
            Err(_) => Completion {
                request_id: self.request_id,
                status: CompletionStatus::Error,
                metadata: serde_json::json!({ "error": "scheduler dropped" }),
            },
        }
    }
}

/// A request as held in a class queue, with its completion channel.
pub struct BatchRequest {
    /// The submitted payload
    pub request: InferenceRequest,
    /// Derived priority class
    pub priority: RequestPriority,
    /// Monotonic admission time
    pub submitted_at: Instant,
    /// Monotonic expiry; enforced pre-dispatch and by cleanup
    pub deadline_at: Instant,
    pub(crate) completion: Option<oneshot::Sender<Completion>>,
}

impl BatchRequest {
    /// Deliver the terminal state for this request.
    pub(crate) fn complete(mut self, status: CompletionStatus, metadata: serde_json::Value) {
        if let Some(sender) = self.completion.take() {
            let _ = sender.send(Completion {
                request_id: self.request.request_id.clone(),
                status,
                metadata,
            });
        }
    }
}

impl fmt::Debug for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRequest")
            .field("request_id", &self.request.request_id)
            .field("priority", &self.priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_source_tag() {
        assert_eq!(
            RequestPriority::from_source_tag("soldier_engine"),
            RequestPriority::Critical
        );
        assert_eq!(
            RequestPriority::from_source_tag("Commander-V2"),
            RequestPriority::High
        );
        assert_eq!(
            RequestPriority::from_source_tag("the_scholar"),
            RequestPriority::Normal
        );
        assert_eq!(
            RequestPriority::from_source_tag("telemetry"),
            RequestPriority::Low
        );
    }

    #[test]
    fn test_soldier_substring_outranks_scholar() {
        // Both substrings present: the higher class wins.
        assert_eq!(
            RequestPriority::from_source_tag("soldier_scholar_bridge"),
            RequestPriority::Critical
        );
    }

    #[test]
    fn test_queue_bounds() {
        assert_eq!(RequestPriority::Critical.max_queue_size(), 100);
        assert_eq!(RequestPriority::High.max_queue_size(), 200);
        assert_eq!(RequestPriority::Normal.max_queue_size(), 500);
        assert_eq!(RequestPriority::Low.max_queue_size(), 1000);
    }

    #[test]
    fn test_request_builder() {
        let request = InferenceRequest::new("r1", "scholar", "what moves the market?")
            .with_max_tokens(50)
            .with_temperature(0.2)
            .with_deadline_ms(750.0);

        assert_eq!(request.max_tokens, 50);
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.deadline_ms, Some(750.0));
    }

    #[tokio::test]
    async fn test_completion_handle_delivers_once() {
        let (tx, rx) = oneshot::channel();
        let handle = CompletionHandle::new("r1".to_string(), rx);

        tx.send(Completion {
            request_id: "r1".to_string(),
            status: CompletionStatus::Success,
            metadata: serde_json::json!({"latency_ms": 3.5}),
        })
        .unwrap();

        let completion = handle.wait().await;
        assert_eq!(completion.status, CompletionStatus::Success);
        assert_eq!(completion.metadata["latency_ms"], 3.5);
    }
}
