//! The adaptive batch scheduler

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::backend::{InferenceBackend, SimulatedBackend};
use super::config::BatchConfig;
use super::pressure::{MemoryProbe, SystemMemoryProbe};
use super::request::{
    BatchRequest, CompletionHandle, CompletionStatus, InferenceRequest, RequestPriority,
};
use super::stats::{PriorityClassStats, SchedulerStatistics};
use super::{SchedulerError, SchedulerResult};

/// Latency samples required before a class's batch size is tuned.
const MIN_ADAPTATION_SAMPLES: usize = 10;

struct ClassState {
    queue: VecDeque<BatchRequest>,
    batch_size: usize,
    latency_window: VecDeque<f64>,
    requests: u64,
}

impl ClassState {
    fn new(batch_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            batch_size,
            latency_window: VecDeque::new(),
            requests: 0,
        }
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.latency_window.is_empty() {
            return 0.0;
        }
        self.latency_window.iter().sum::<f64>() / self.latency_window.len() as f64
    }
}

struct SchedulerState {
    classes: [ClassState; 4],
    total_requests: u64,
    batches_processed: u64,
    avg_batch_size: f64,
    avg_latency_ms: f64,
    queue_overflow_count: u64,
    memory_pressure_events: u64,
    batch_size_adjustments: u64,
    expired_requests: u64,
    memory_pressure: f64,
    last_adjustment: Option<Instant>,
}

impl SchedulerState {
    fn new(config: &BatchConfig) -> Self {
        Self {
            classes: RequestPriority::ALL
                .map(|priority| ClassState::new(config.initial_batch_size_for(priority))),
            total_requests: 0,
            batches_processed: 0,
            avg_batch_size: 0.0,
            avg_latency_ms: 0.0,
            queue_overflow_count: 0,
            memory_pressure_events: 0,
            batch_size_adjustments: 0,
            expired_requests: 0,
            memory_pressure: 0.0,
            last_adjustment: None,
        }
    }

    fn class(&self, priority: RequestPriority) -> &ClassState {
        &self.classes[priority.class_index()]
    }

    fn class_mut(&mut self, priority: RequestPriority) -> &mut ClassState {
        &mut self.classes[priority.class_index()]
    }
}

/// Priority-aware scheduler that tunes batch sizes toward per-class
/// latency targets while responding to host memory pressure.
///
/// One background task owns the drain loop; `submit` and `statistics`
/// are safe to call from any task. Within a class, requests dispatch in
/// FIFO order; across classes the loop always drains higher priority
/// first, so a perpetually full critical queue can starve background
/// work; that bias is intentional.
pub struct AdaptiveBatchScheduler {
    config: BatchConfig,
    backend: Arc<dyn InferenceBackend>,
    probe: Arc<dyn MemoryProbe>,
    state: Arc<Mutex<SchedulerState>>,
    running: Arc<AtomicBool>,
    loop_task: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl Clone for AdaptiveBatchScheduler {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            backend: Arc::clone(&self.backend),
            probe: Arc::clone(&self.probe),
            state: Arc::clone(&self.state),
            running: Arc::clone(&self.running),
            loop_task: Arc::clone(&self.loop_task),
        }
    }
}

impl AdaptiveBatchScheduler {
    /// Create a scheduler over an explicit backend and memory probe.
    pub fn new(
        config: BatchConfig,
        backend: Arc<dyn InferenceBackend>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let state = SchedulerState::new(&config);
        log::info!("[AdaptiveBatchScheduler] Initialized with adaptive batching");

        Self {
            config,
            backend,
            probe,
            state: Arc::new(Mutex::new(state)),
            running: Arc::new(AtomicBool::new(false)),
            loop_task: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Create a scheduler against the simulated backend and the live
    /// host memory probe. For deployments without a real model.
    pub fn with_simulated_backend(config: BatchConfig) -> Self {
        Self::new(
            config,
            Arc::new(SimulatedBackend::default()),
            Arc::new(SystemMemoryProbe::new()),
        )
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Submit an inference request.
    ///
    /// The request is classified by its source tag and appended to the
    /// class queue; the returned handle resolves exactly once with the
    /// terminal status. Submission works whether or not the loop is
    /// running; queued requests wait for `start`.
    pub fn submit(&self, request: InferenceRequest) -> SchedulerResult<CompletionHandle> {
        if let Some(deadline_ms) = request.deadline_ms {
            if !deadline_ms.is_finite() || deadline_ms < 0.0 {
                return Err(SchedulerError::InvalidInput(format!(
                    "deadline_ms must be finite and non-negative, got {deadline_ms}"
                )));
            }
        }

        let priority = RequestPriority::from_source_tag(&request.source_module);
        let deadline_ms = request
            .deadline_ms
            .unwrap_or_else(|| self.config.default_deadline_ms(priority));

        let now = Instant::now();
        let request_id = request.request_id.clone();
        let (sender, receiver) = oneshot::channel();
        let queued = BatchRequest {
            request,
            priority,
            submitted_at: now,
            deadline_at: now + Duration::from_secs_f64(deadline_ms / 1000.0),
            completion: Some(sender),
        };

        {
            let mut state = self.state.lock();
            let class = state.class_mut(priority);
            if class.queue.len() >= priority.max_queue_size() {
                state.queue_overflow_count += 1;
                log::warn!("[AdaptiveBatchScheduler] Queue overflow for {priority}");
                return Err(SchedulerError::QueueOverflow(priority));
            }
            class.queue.push_back(queued);
            class.requests += 1;
            state.total_requests += 1;
        }

        log::debug!("[AdaptiveBatchScheduler] Request submitted: {request_id} ({priority})");
        Ok(CompletionHandle::new(request_id, receiver))
    }

    /// Launch the scheduler loop. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("[AdaptiveBatchScheduler] Scheduler already running");
            return;
        }

        let scheduler = self.clone();
        let handle = tokio::spawn(async move { scheduler.run_loop().await });
        *self.loop_task.lock().await = Some(handle);
        log::info!("[AdaptiveBatchScheduler] Scheduler started");
    }

    /// Stop the scheduler loop and wait for it to exit. Idempotent; an
    /// in-flight batch is allowed to complete.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.loop_task.lock().await.take() {
            let _ = handle.await;
        }
        log::info!("[AdaptiveBatchScheduler] Scheduler stopped");
    }

    /// Stop the loop and fail every queued request with `Timeout`.
    pub async fn shutdown(&self) {
        log::info!("[AdaptiveBatchScheduler] Shutting down...");
        self.stop().await;

        let pending: Vec<BatchRequest> = {
            let mut state = self.state.lock();
            state
                .classes
                .iter_mut()
                .flat_map(|class| class.queue.drain(..))
                .collect()
        };

        let drained = pending.len();
        for request in pending {
            request.complete(
                CompletionStatus::Timeout,
                serde_json::json!({ "reason": "Scheduler shut down" }),
            );
        }
        if drained > 0 {
            log::warn!("[AdaptiveBatchScheduler] Timed out {drained} pending requests");
        }
        log::info!("[AdaptiveBatchScheduler] Shutdown completed");
    }

    /// Whether the loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of counters, queue depths, batch sizes and latencies.
    pub fn statistics(&self) -> SchedulerStatistics {
        let state = self.state.lock();

        let classes = RequestPriority::ALL
            .iter()
            .map(|&priority| {
                let class = state.class(priority);
                PriorityClassStats {
                    priority,
                    requests: class.requests,
                    queue_size: class.queue.len(),
                    max_queue_size: priority.max_queue_size(),
                    current_batch_size: class.batch_size,
                    avg_latency_ms: class.avg_latency_ms(),
                    target_latency_ms: self.config.target_latency_ms(priority),
                }
            })
            .collect();

        SchedulerStatistics {
            running: self.is_running(),
            total_requests: state.total_requests,
            batches_processed: state.batches_processed,
            avg_batch_size: state.avg_batch_size,
            avg_latency_ms: state.avg_latency_ms,
            queue_overflow_count: state.queue_overflow_count,
            memory_pressure_events: state.memory_pressure_events,
            batch_size_adjustments: state.batch_size_adjustments,
            expired_requests: state.expired_requests,
            memory_pressure: state.memory_pressure,
            classes,
        }
    }

    async fn run_loop(&self) {
        log::info!("[AdaptiveBatchScheduler] Scheduler loop started");

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.tick().await {
                log::error!("[AdaptiveBatchScheduler] Scheduler loop error: {e}");
                tokio::time::sleep(Duration::from_millis(self.config.error_backoff_ms)).await;
            }
            tokio::time::sleep(Duration::from_millis(self.config.tick_interval_ms)).await;
        }

        log::info!("[AdaptiveBatchScheduler] Scheduler loop stopped");
    }

    async fn tick(&self) -> SchedulerResult<()> {
        self.refresh_memory_pressure();

        for priority in RequestPriority::ALL {
            self.process_priority_queue(priority).await?;
        }

        self.adapt_batch_sizes();
        self.cleanup_expired();
        Ok(())
    }

    fn refresh_memory_pressure(&self) {
        let pressure = self
            .probe
            .memory_pressure()
            .unwrap_or(self.config.fallback_memory_pressure);

        let mut state = self.state.lock();
        state.memory_pressure = pressure;
        if pressure > self.config.memory_pressure_threshold {
            state.memory_pressure_events += 1;
            log::warn!("[AdaptiveBatchScheduler] High memory pressure: {:.0}%", pressure * 100.0);
        }
    }

    async fn process_priority_queue(&self, priority: RequestPriority) -> SchedulerResult<()> {
        let (batch, expired) = {
            let mut state = self.state.lock();
            let pressure = state.memory_pressure;
            let threshold = self.config.memory_pressure_threshold;
            let min_batch_size = self.config.min_batch_size;
            let class = state.class_mut(priority);

            if class.queue.is_empty() {
                return Ok(());
            }

            let mut batch_size = class.batch_size;
            if pressure > threshold {
                batch_size = (batch_size / 2).max(min_batch_size);
            }

            let now = Instant::now();
            let mut batch = Vec::new();
            let mut expired = Vec::new();
            while batch.len() < batch_size {
                match class.queue.pop_front() {
                    Some(request) if request.deadline_at <= now => expired.push(request),
                    Some(request) => batch.push(request),
                    None => break,
                }
            }
            state.expired_requests += expired.len() as u64;
            (batch, expired)
        };

        for request in expired {
            log::warn!(
                "[AdaptiveBatchScheduler] Request expired: {}",
                request.request.request_id
            );
            request.complete(
                CompletionStatus::Timeout,
                serde_json::json!({ "reason": "Request expired" }),
            );
        }

        if batch.is_empty() {
            return Ok(());
        }
        self.process_batch(batch, priority).await
    }

    async fn process_batch(
        &self,
        batch: Vec<BatchRequest>,
        priority: RequestPriority,
    ) -> SchedulerResult<()> {
        let batch_len = batch.len();
        log::debug!(
            "[AdaptiveBatchScheduler] Processing batch: {batch_len} requests ({priority})"
        );

        let batch_start = Instant::now();
        match self.backend.infer_batch(&batch).await {
            Ok(outcome) => {
                let batch_latency_ms = batch_start.elapsed().as_secs_f64() * 1000.0;
                self.record_batch(priority, batch_len, batch_latency_ms);

                for (index, request) in batch.into_iter().enumerate() {
                    let metadata = serde_json::json!({
                        "latency_ms": batch_latency_ms,
                        "output": outcome.outputs.get(index),
                    });
                    request.complete(CompletionStatus::Success, metadata);
                }

                log::debug!(
                    "[AdaptiveBatchScheduler] Batch completed: {batch_latency_ms:.2}ms ({priority})"
                );
                Ok(())
            }
            Err(e) => {
                log::error!("[AdaptiveBatchScheduler] Batch processing failed: {e}");
                let message = e.to_string();
                for request in batch {
                    request.complete(
                        CompletionStatus::Error,
                        serde_json::json!({ "error": message }),
                    );
                }
                Err(SchedulerError::Backend(message))
            }
        }
    }

    fn record_batch(&self, priority: RequestPriority, batch_len: usize, latency_ms: f64) {
        let window_size = self.config.latency_window_size;
        let mut state = self.state.lock();

        let class = state.class_mut(priority);
        if class.latency_window.len() >= window_size {
            class.latency_window.pop_front();
        }
        class.latency_window.push_back(latency_ms);

        state.batches_processed += 1;
        let batches = state.batches_processed as f64;
        state.avg_batch_size =
            (state.avg_batch_size * (batches - 1.0) + batch_len as f64) / batches;
        state.avg_latency_ms = (state.avg_latency_ms * (batches - 1.0) + latency_ms) / batches;
    }

    fn adapt_batch_sizes(&self) {
        let mut state = self.state.lock();

        let now = Instant::now();
        if let Some(last) = state.last_adjustment {
            let min_interval =
                Duration::from_secs_f64(self.config.min_adjustment_interval_ms / 1000.0);
            if now.duration_since(last) < min_interval {
                return;
            }
        }

        for priority in RequestPriority::ALL {
            let target = self.config.target_latency_ms(priority);
            let class = state.class_mut(priority);
            if class.latency_window.len() < MIN_ADAPTATION_SAMPLES {
                continue;
            }

            let avg = class.avg_latency_ms();
            let current = class.batch_size;
            let adjusted = if avg > target * 1.2 {
                // Latency is the hard constraint: shrink first.
                (current as f64 * (1.0 - self.config.adjustment_factor)).floor() as usize
            } else if avg < target * 0.8 {
                (current as f64 * (1.0 + self.config.adjustment_factor)).ceil() as usize
            } else {
                continue;
            };

            let adjusted = adjusted.clamp(self.config.min_batch_size, self.config.max_batch_size);
            if adjusted != current {
                class.batch_size = adjusted;
                state.batch_size_adjustments += 1;
                log::info!(
                    "[AdaptiveBatchScheduler] Batch size adjusted for {priority}: \
                     {current} -> {adjusted} (avg_latency: {avg:.2}ms, target: {target:.2}ms)"
                );
            }
        }

        state.last_adjustment = Some(now);
    }

    fn cleanup_expired(&self) {
        let expired: Vec<BatchRequest> = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let mut expired = Vec::new();

            for class in &mut state.classes {
                while class
                    .queue
                    .front()
                    .is_some_and(|request| request.deadline_at <= now)
                {
                    if let Some(request) = class.queue.pop_front() {
                        expired.push(request);
                    }
                }
            }
            state.expired_requests += expired.len() as u64;
            expired
        };

        let count = expired.len();
        for request in expired {
            request.complete(
                CompletionStatus::Timeout,
                serde_json::json!({ "reason": "Request expired" }),
            );
        }
        if count > 0 {
            log::warn!("[AdaptiveBatchScheduler] Cleaned up {count} expired requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::pressure::FixedMemoryProbe;

    fn scheduler_with(config: BatchConfig) -> AdaptiveBatchScheduler {
        AdaptiveBatchScheduler::new(
            config,
            Arc::new(SimulatedBackend::default()),
            Arc::new(FixedMemoryProbe::new(0.3)),
        )
    }

    fn request(id: &str, source: &str) -> InferenceRequest {
        InferenceRequest::new(id, source, "prompt").with_deadline_ms(60_000.0)
    }

    #[tokio::test]
    async fn test_submit_classifies_and_queues() {
        let scheduler = scheduler_with(BatchConfig::default());

        scheduler.submit(request("a", "soldier_x")).unwrap();
        scheduler.submit(request("b", "commander_y")).unwrap();
        scheduler.submit(request("c", "scholar_z")).unwrap();
        scheduler.submit(request("d", "janitor")).unwrap();

        let stats = scheduler.statistics();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.class(RequestPriority::Critical).queue_size, 1);
        assert_eq!(stats.class(RequestPriority::High).queue_size, 1);
        assert_eq!(stats.class(RequestPriority::Normal).queue_size, 1);
        assert_eq!(stats.class(RequestPriority::Low).queue_size, 1);
    }

    #[tokio::test]
    async fn test_submit_at_capacity_then_overflow() {
        let scheduler = scheduler_with(BatchConfig::default());

        for i in 0..RequestPriority::Critical.max_queue_size() {
            scheduler
                .submit(request(&format!("r{i}"), "soldier"))
                .unwrap();
        }

        let overflow = scheduler.submit(request("straw", "soldier"));
        assert!(matches!(
            overflow,
            Err(SchedulerError::QueueOverflow(RequestPriority::Critical))
        ));
        assert_eq!(scheduler.statistics().queue_overflow_count, 1);
    }

    #[tokio::test]
    async fn test_negative_deadline_rejected() {
        let scheduler = scheduler_with(BatchConfig::default());
        let bad = InferenceRequest::new("r", "soldier", "p").with_deadline_ms(-5.0);
        assert!(matches!(
            scheduler.submit(bad),
            Err(SchedulerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_adaptation_shrinks_on_slow_batches() {
        let config = BatchConfig {
            adjustment_factor: 0.25,
            ..BatchConfig::default()
        };
        let scheduler = scheduler_with(config);

        {
            let mut state = scheduler.state.lock();
            let class = state.class_mut(RequestPriority::Critical);
            // Ten samples at twice the 10ms target.
            for _ in 0..10 {
                class.latency_window.push_back(20.0);
            }
        }

        scheduler.adapt_batch_sizes();

        let stats = scheduler.statistics();
        // floor(4 * 0.75) = 3
        assert_eq!(stats.class(RequestPriority::Critical).current_batch_size, 3);
        assert_eq!(stats.batch_size_adjustments, 1);
    }

    #[tokio::test]
    async fn test_adaptation_grows_on_fast_batches() {
        let scheduler = scheduler_with(BatchConfig::default());

        {
            let mut state = scheduler.state.lock();
            let class = state.class_mut(RequestPriority::Critical);
            for _ in 0..10 {
                class.latency_window.push_back(2.0);
            }
        }

        scheduler.adapt_batch_sizes();

        // ceil(4 * 1.1) = 5
        let stats = scheduler.statistics();
        assert_eq!(stats.class(RequestPriority::Critical).current_batch_size, 5);
    }

    #[tokio::test]
    async fn test_adaptation_holds_inside_band() {
        let scheduler = scheduler_with(BatchConfig::default());

        {
            let mut state = scheduler.state.lock();
            let class = state.class_mut(RequestPriority::Critical);
            // Exactly on target: inside [0.8, 1.2].
            for _ in 0..10 {
                class.latency_window.push_back(10.0);
            }
        }

        scheduler.adapt_batch_sizes();
        assert_eq!(scheduler.statistics().batch_size_adjustments, 0);
    }

    #[tokio::test]
    async fn test_adaptation_respects_min_interval() {
        let scheduler = scheduler_with(BatchConfig::default());

        {
            let mut state = scheduler.state.lock();
            state.last_adjustment = Some(Instant::now());
            let class = state.class_mut(RequestPriority::Critical);
            for _ in 0..10 {
                class.latency_window.push_back(100.0);
            }
        }

        scheduler.adapt_batch_sizes();
        // Interval not yet elapsed: no change.
        assert_eq!(
            scheduler
                .statistics()
                .class(RequestPriority::Critical)
                .current_batch_size,
            4
        );
    }

    #[tokio::test]
    async fn test_cleanup_completes_expired_with_timeout() {
        let scheduler = scheduler_with(BatchConfig::default());

        let handle = scheduler
            .submit(InferenceRequest::new("r", "soldier", "p").with_deadline_ms(0.0))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        scheduler.cleanup_expired();

        let completion = handle.wait().await;
        assert_eq!(completion.status, CompletionStatus::Timeout);
        assert_eq!(completion.metadata["reason"], "Request expired");
        assert_eq!(scheduler.statistics().expired_requests, 1);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let scheduler = scheduler_with(BatchConfig::default());

        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.is_running());

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_times_out_pending_requests() {
        let scheduler = scheduler_with(BatchConfig::default());

        let handle = scheduler.submit(request("pending", "scholar")).unwrap();
        scheduler.shutdown().await;

        let completion = handle.wait().await;
        assert_eq!(completion.status, CompletionStatus::Timeout);
        assert_eq!(scheduler.statistics().class(RequestPriority::Normal).queue_size, 0);
    }
}
