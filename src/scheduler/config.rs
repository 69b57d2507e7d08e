//! Scheduler configuration

use serde::{Deserialize, Serialize};

use super::request::RequestPriority;

/// Tunables for the adaptive batch scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Latency target for the critical class, milliseconds
    pub critical_target_latency_ms: f64,
    /// Latency target for the high class, milliseconds
    pub high_target_latency_ms: f64,
    /// Latency target for the normal class, milliseconds
    pub normal_target_latency_ms: f64,

    /// Floor for any class's batch size
    pub min_batch_size: usize,
    /// Ceiling for any class's batch size
    pub max_batch_size: usize,
    /// Starting batch size for the critical class; lower classes start
    /// at `initial * 2^class_index`
    pub initial_batch_size: usize,

    /// Maximum wait to gather a batch, milliseconds
    pub batch_timeout_ms: f64,
    /// Memory-usage fraction above which batches are halved
    pub memory_pressure_threshold: f64,
    /// Pressure assumed when the host probe has no reading
    pub fallback_memory_pressure: f64,

    /// Latency samples retained per class
    pub latency_window_size: usize,
    /// Multiplicative step for batch-size changes
    pub adjustment_factor: f64,
    /// Minimum interval between adjustment passes, milliseconds
    pub min_adjustment_interval_ms: f64,

    /// Scheduler loop cadence, milliseconds
    pub tick_interval_ms: u64,
    /// Backoff after a loop-body error, milliseconds
    pub error_backoff_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            critical_target_latency_ms: 10.0,
            high_target_latency_ms: 200.0,
            normal_target_latency_ms: 1000.0,
            min_batch_size: 1,
            max_batch_size: 32,
            initial_batch_size: 4,
            batch_timeout_ms: 50.0,
            memory_pressure_threshold: 0.8,
            fallback_memory_pressure: 0.3,
            latency_window_size: 100,
            adjustment_factor: 0.1,
            min_adjustment_interval_ms: 1000.0,
            tick_interval_ms: 10,
            error_backoff_ms: 100,
        }
    }
}

impl BatchConfig {
    /// Latency target for a priority class, milliseconds.
    ///
    /// The low class has no target of its own; it tolerates twice the
    /// normal-class target.
    pub fn target_latency_ms(&self, priority: RequestPriority) -> f64 {
        match priority {
            RequestPriority::Critical => self.critical_target_latency_ms,
            RequestPriority::High => self.high_target_latency_ms,
            RequestPriority::Normal => self.normal_target_latency_ms,
            RequestPriority::Low => self.normal_target_latency_ms * 2.0,
        }
    }

    /// Default deadline for requests that submit without one.
    pub fn default_deadline_ms(&self, priority: RequestPriority) -> f64 {
        self.target_latency_ms(priority)
    }

    /// Starting batch size for a class: lower-priority classes begin
    /// larger because they tolerate more latency.
    pub fn initial_batch_size_for(&self, priority: RequestPriority) -> usize {
        self.initial_batch_size << priority.class_index()
    }
}
