//! Adaptive batch scheduling for shared inference
//!
//! This module provides:
//! - Priority-classified request admission under per-class queue bounds
//! - A background loop draining queues into deadline-respecting batches
//! - Continuous per-class batch-size tuning toward latency targets
//! - Memory-pressure-aware batch throttling
//! - Per-request completion channels and a statistics snapshot

pub mod backend;
pub mod config;
pub mod pressure;
pub mod request;
pub mod scheduler;
pub mod stats;

use thiserror::Error;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Queue full for priority {0}")]
    QueueOverflow(RequestPriority),

    #[error("Inference backend error: {0}")]
    Backend(String),
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

pub use backend::{BatchOutcome, InferenceBackend, SimulatedBackend};
pub use config::BatchConfig;
pub use pressure::{FixedMemoryProbe, MemoryProbe, SystemMemoryProbe};
pub use request::{
    BatchRequest, Completion, CompletionHandle, CompletionStatus, InferenceRequest,
    RequestPriority,
};
pub use scheduler::AdaptiveBatchScheduler;
pub use stats::{PriorityClassStats, SchedulerStatistics};
