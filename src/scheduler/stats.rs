//! Scheduler statistics snapshots

use serde::Serialize;

use super::request::RequestPriority;

/// Per-class view inside a [`SchedulerStatistics`] snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PriorityClassStats {
    /// The class this row describes
    pub priority: RequestPriority,
    /// Requests admitted to this class so far
    pub requests: u64,
    /// Requests currently queued
    pub queue_size: usize,
    /// Admission bound for the class
    pub max_queue_size: usize,
    /// Batch size the adaptive tuner currently holds
    pub current_batch_size: usize,
    /// Mean of the class's recent batch latencies, milliseconds
    pub avg_latency_ms: f64,
    /// The class's latency target, milliseconds
    pub target_latency_ms: f64,
}

/// Point-in-time scheduler state, safe to serialize and ship.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatistics {
    /// Whether the scheduler loop is active
    pub running: bool,
    /// Requests accepted since creation
    pub total_requests: u64,
    /// Batches dispatched to the backend
    pub batches_processed: u64,
    /// Running mean batch size across all dispatches
    pub avg_batch_size: f64,
    /// Running mean batch latency across all dispatches, milliseconds
    pub avg_latency_ms: f64,
    /// Submits rejected on a full class queue
    pub queue_overflow_count: u64,
    /// Loop iterations that observed pressure above the threshold
    pub memory_pressure_events: u64,
    /// Batch-size changes applied by the tuner
    pub batch_size_adjustments: u64,
    /// Requests that expired before dispatch
    pub expired_requests: u64,
    /// Most recent memory-usage fraction
    pub memory_pressure: f64,
    /// One row per class, highest priority first
    pub classes: Vec<PriorityClassStats>,
}

impl SchedulerStatistics {
    /// Row for one priority class.
    pub fn class(&self, priority: RequestPriority) -> &PriorityClassStats {
        &self.classes[priority.class_index()]
    }
}
