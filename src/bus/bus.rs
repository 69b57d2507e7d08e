//! Event bus with priority dispatch and handler isolation
//!
//! Publication is non-blocking: events land in one of four priority
//! lanes and a single dispatcher task drains them, highest priority
//! first, FIFO within a lane. Every handler invocation runs in its own
//! spawned task that the dispatcher awaits, so a failing or panicking
//! handler cannot take down its neighbours or reorder the stream.
//!
//! Shutdown drops whatever is still queued; the dropped count is
//! logged. Publishers that need delivery guarantees must drain before
//! shutting down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::event::{Event, EventPriority, EventType};

/// Default bound on queued-but-undispatched events.
const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Event bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Event queue full ({capacity} pending events)")]
    Backpressure {
        /// Configured queue bound
        capacity: usize,
    },

    #[error("Event bus is shut down")]
    ShutDown,

    #[error("Handler failed: {0}")]
    HandlerFailed(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Uniform handler signature for all subscribers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. Errors are logged and counted by the bus but
    /// never propagate to other handlers or the publisher.
    async fn handle(&self, event: &Event) -> BusResult<()>;
}

/// Adapter turning a plain closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> BusResult<()> + Send + Sync,
{
    /// Wrap `f` as a handler.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> BusResult<()> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> BusResult<()> {
        (self.f)(event)
    }
}

/// Opaque receipt identifying one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionToken {
    event_type: EventType,
    seq: u64,
    handler_id: String,
}

impl SubscriptionToken {
    /// Id of the subscribed handler (used for targeted routing).
    pub fn handler_id(&self) -> &str {
        &self.handler_id
    }
}

#[derive(Clone)]
struct Subscription {
    seq: u64,
    handler_id: String,
    handler: Arc<dyn EventHandler>,
    active: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    Uninitialized,
    Initialized,
    ShutDown,
}

/// Bus delivery counters.
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    /// Events accepted by `publish`
    pub events_published: u64,
    /// Events fully dispatched (all matching handlers invoked)
    pub events_processed: u64,
    /// Individual handler invocations that failed or panicked
    pub events_failed: u64,
    /// Currently registered handlers
    pub handlers_registered: usize,
    /// Seconds since `initialize`
    pub uptime_seconds: f64,
    /// `events_published / uptime_seconds`
    pub events_per_second: f64,
}

#[derive(Default)]
struct Lanes {
    queues: [VecDeque<Event>; 4],
    len: usize,
}

impl Lanes {
    fn push(&mut self, event: Event) {
        self.queues[event.priority.lane()].push_back(event);
        self.len += 1;
    }

    fn pop_next(&mut self) -> Option<Event> {
        for queue in &mut self.queues {
            if let Some(event) = queue.pop_front() {
                self.len -= 1;
                return Some(event);
            }
        }
        None
    }

    fn drain_all(&mut self) -> usize {
        let dropped = self.len;
        for queue in &mut self.queues {
            queue.clear();
        }
        self.len = 0;
        dropped
    }
}

#[derive(Default)]
struct BusCounters {
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    handlers: AtomicUsize,
}

/// In-process publish/subscribe hub for engine communication.
pub struct EventBus {
    state: Mutex<BusState>,
    subscriptions: Arc<DashMap<EventType, Vec<Subscription>>>,
    lanes: Arc<Mutex<Lanes>>,
    capacity: usize,
    notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    counters: Arc<BusCounters>,
    next_event_id: AtomicU64,
    next_subscription: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with the default queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a bus bounding the pending-event queue at `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BusState::Uninitialized),
            subscriptions: Arc::new(DashMap::new()),
            lanes: Arc::new(Mutex::new(Lanes::default())),
            capacity,
            notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(BusCounters::default()),
            next_event_id: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            started_at: Mutex::new(None),
            dispatcher: tokio::sync::Mutex::new(None),
        }
    }

    /// Start the dispatcher. Idempotent; registrations and events
    /// accepted beforehand begin flowing once this returns.
    pub async fn initialize(&self) -> BusResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                BusState::Initialized => {
                    log::debug!("Event bus already initialized");
                    return Ok(());
                }
                BusState::ShutDown => return Err(BusError::ShutDown),
                BusState::Uninitialized => *state = BusState::Initialized,
            }
        }

        *self.started_at.lock() = Some(Instant::now());
        self.running.store(true, Ordering::SeqCst);

        let dispatcher = Dispatcher {
            running: Arc::clone(&self.running),
            lanes: Arc::clone(&self.lanes),
            notify: Arc::clone(&self.notify),
            subscriptions: Arc::clone(&self.subscriptions),
            counters: Arc::clone(&self.counters),
        };

        let handle = tokio::spawn(async move { dispatcher.run().await });
        *self.dispatcher.lock().await = Some(handle);

        log::info!("Event bus initialized");
        Ok(())
    }

    /// Stop dispatch and drop pending events.
    ///
    /// The handler currently executing (if any) completes first; the
    /// number of dropped events is logged.
    pub async fn shutdown(&self) -> BusResult<()> {
        {
            let mut state = self.state.lock();
            if *state == BusState::ShutDown {
                return Ok(());
            }
            *state = BusState::ShutDown;
        }

        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();

        if let Some(handle) = self.dispatcher.lock().await.take() {
            let _ = handle.await;
        }

        let dropped = self.lanes.lock().drain_all();
        if dropped > 0 {
            log::warn!("Event bus shutdown dropped {dropped} pending events");
        }
        log::info!("Event bus shut down");
        Ok(())
    }

    /// Register `handler` for `event_type`.
    ///
    /// A missing `handler_id` gets a generated unique id. Subscribing
    /// before `initialize` is fine; registrations are simply held until
    /// dispatch starts.
    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        handler_id: Option<String>,
    ) -> SubscriptionToken {
        let handler_id = handler_id.unwrap_or_else(|| format!("handler_{}", Uuid::new_v4()));
        let seq = self.next_subscription.fetch_add(1, Ordering::Relaxed);

        let subscription = Subscription {
            seq,
            handler_id: handler_id.clone(),
            handler,
            active: Arc::new(AtomicBool::new(true)),
        };

        self.subscriptions
            .entry(event_type)
            .or_default()
            .push(subscription);
        self.counters.handlers.fetch_add(1, Ordering::Relaxed);

        log::debug!("Subscribed '{handler_id}' to {event_type:?}");
        SubscriptionToken {
            event_type,
            seq,
            handler_id,
        }
    }

    /// Remove the subscription behind `token`.
    ///
    /// Safe to call while dispatch is running: the registration is
    /// deactivated first, so a dispatch snapshot already taken skips it,
    /// and it is gone from the registry by the next cycle.
    pub fn unsubscribe(&self, token: &SubscriptionToken) -> bool {
        if let Some(mut subs) = self.subscriptions.get_mut(&token.event_type) {
            if let Some(pos) = subs.iter().position(|s| s.seq == token.seq) {
                subs[pos].active.store(false, Ordering::SeqCst);
                subs.remove(pos);
                self.counters.handlers.fetch_sub(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Enqueue `event` for dispatch. Non-blocking.
    ///
    /// Returns the allocated event id. Fails with
    /// [`BusError::Backpressure`] when the queue bound is hit; the bus
    /// never retries on the publisher's behalf.
    pub fn publish(&self, mut event: Event) -> BusResult<u64> {
        if *self.state.lock() == BusState::ShutDown {
            return Err(BusError::ShutDown);
        }

        event.event_id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        let event_id = event.event_id;

        {
            let mut lanes = self.lanes.lock();
            if lanes.len >= self.capacity {
                return Err(BusError::Backpressure {
                    capacity: self.capacity,
                });
            }
            lanes.push(event);
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(event_id)
    }

    /// Build and publish an event in one call.
    pub fn publish_simple(
        &self,
        event_type: EventType,
        source_module: impl Into<String>,
        data: serde_json::Value,
        priority: Option<EventPriority>,
        target_module: Option<String>,
    ) -> BusResult<u64> {
        let mut event = Event::new(event_type, source_module, data);
        if let Some(priority) = priority {
            event = event.with_priority(priority);
        }
        if let Some(target) = target_module {
            event = event.with_target(target);
        }
        self.publish(event)
    }

    /// Delivery counters snapshot.
    pub fn stats(&self) -> BusStats {
        let uptime = match *self.started_at.lock() {
            Some(started) => started.elapsed().as_secs_f64(),
            None => 0.0,
        };
        let published = self.counters.published.load(Ordering::Relaxed);

        BusStats {
            events_published: published,
            events_processed: self.counters.processed.load(Ordering::Relaxed),
            events_failed: self.counters.failed.load(Ordering::Relaxed),
            handlers_registered: self.counters.handlers.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            events_per_second: if uptime > 0.0 {
                published as f64 / uptime
            } else {
                0.0
            },
        }
    }

    /// Number of events waiting for dispatch.
    pub fn pending_events(&self) -> usize {
        self.lanes.lock().len
    }
}

struct Dispatcher {
    running: Arc<AtomicBool>,
    lanes: Arc<Mutex<Lanes>>,
    notify: Arc<Notify>,
    subscriptions: Arc<DashMap<EventType, Vec<Subscription>>>,
    counters: Arc<BusCounters>,
}

impl Dispatcher {
    async fn run(&self) {
        log::info!("Event dispatcher started");

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let event = self.lanes.lock().pop_next();
            match event {
                Some(event) => self.dispatch_event(event).await,
                None => self.notify.notified().await,
            }
        }

        log::info!("Event dispatcher stopped");
    }

    async fn dispatch_event(&self, event: Event) {
        // Snapshot so subscribe/unsubscribe during dispatch never
        // observes a half-iterated registry.
        let snapshot: Vec<Subscription> = self
            .subscriptions
            .get(&event.event_type)
            .map(|subs| subs.value().clone())
            .unwrap_or_default();

        for subscription in snapshot {
            if !subscription.active.load(Ordering::SeqCst) {
                continue;
            }
            if let Some(target) = &event.target_module {
                if !subscription.handler_id.contains(target.as_str()) {
                    continue;
                }
            }

            let handler = Arc::clone(&subscription.handler);
            let handler_event = event.clone();
            let outcome =
                tokio::spawn(async move { handler.handle(&handler_event).await }).await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "Handler '{}' failed for {:?}: {e}",
                        subscription.handler_id,
                        event.event_type
                    );
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "Handler '{}' panicked for {:?}: {e}",
                        subscription.handler_id,
                        event.event_type
                    );
                }
            }
        }

        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &Event) -> BusResult<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    fn recorder() -> (Arc<Recorder>, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Recorder {
                events: Arc::clone(&events),
            }),
            events,
        )
    }

    async fn drain(bus: &EventBus) {
        for _ in 0..100 {
            if bus.pending_events() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // One more beat so the in-flight event finishes its handlers.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_handlers() {
        let bus = EventBus::new();
        let (h1, e1) = recorder();
        let (h2, e2) = recorder();

        bus.subscribe(EventType::SystemAlert, h1, None);
        bus.subscribe(EventType::SystemAlert, h2, None);
        bus.initialize().await.unwrap();

        bus.publish_simple(
            EventType::SystemAlert,
            "broadcaster",
            serde_json::json!({"message": "hello"}),
            None,
            None,
        )
        .unwrap();

        drain(&bus).await;
        assert_eq!(e1.lock().len(), 1);
        assert_eq!(e2.lock().len(), 1);

        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_priority_order_within_backlog() {
        let bus = EventBus::new();
        let (handler, received) = recorder();
        bus.subscribe(EventType::SystemAlert, handler, None);

        // Publish into an idle bus so the backlog dispatches strictly by
        // priority once the dispatcher starts.
        for (priority, tag) in [
            (EventPriority::Low, "low"),
            (EventPriority::Normal, "normal"),
            (EventPriority::Critical, "critical"),
            (EventPriority::High, "high"),
        ] {
            bus.publish(
                Event::new(
                    EventType::SystemAlert,
                    "test",
                    serde_json::json!({ "tag": tag }),
                )
                .with_priority(priority),
            )
            .unwrap();
        }

        bus.initialize().await.unwrap();
        drain(&bus).await;

        let tags: Vec<String> = received
            .lock()
            .iter()
            .map(|e| e.data["tag"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(tags, vec!["critical", "high", "normal", "low"]);

        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_failure_is_isolated() {
        let bus = EventBus::new();
        let failing = Arc::new(FnHandler::new(|_event: &Event| {
            Err(BusError::HandlerFailed("boom".to_string()))
        }));
        let (backup, backup_events) = recorder();

        bus.subscribe(EventType::SystemAlert, failing, None);
        bus.subscribe(EventType::SystemAlert, backup, None);
        bus.initialize().await.unwrap();

        bus.publish_simple(
            EventType::SystemAlert,
            "test",
            serde_json::json!({}),
            None,
            None,
        )
        .unwrap();
        drain(&bus).await;

        assert_eq!(backup_events.lock().len(), 1);
        let stats = bus.stats();
        assert_eq!(stats.events_failed, 1);
        assert_eq!(stats.events_processed, 1);

        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let bus = EventBus::new();
        bus.initialize().await.unwrap();
        bus.initialize().await.unwrap();

        bus.publish_simple(
            EventType::SystemQuery,
            "test",
            serde_json::json!({}),
            None,
            None,
        )
        .unwrap();
        assert_eq!(bus.stats().events_published, 1);

        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_fails() {
        let bus = EventBus::new();
        bus.initialize().await.unwrap();
        bus.shutdown().await.unwrap();

        let result = bus.publish(Event::new(
            EventType::SystemAlert,
            "late",
            serde_json::json!({}),
        ));
        assert!(matches!(result, Err(BusError::ShutDown)));
    }

    #[tokio::test]
    async fn test_backpressure_on_full_queue() {
        let bus = EventBus::with_capacity(2);

        bus.publish(Event::new(EventType::SystemAlert, "a", serde_json::json!({})))
            .unwrap();
        bus.publish(Event::new(EventType::SystemAlert, "b", serde_json::json!({})))
            .unwrap();
        let third = bus.publish(Event::new(EventType::SystemAlert, "c", serde_json::json!({})));

        assert!(matches!(third, Err(BusError::Backpressure { capacity: 2 })));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (handler, events) = recorder();
        let token = bus.subscribe(EventType::SystemAlert, handler, None);
        bus.initialize().await.unwrap();

        bus.publish_simple(
            EventType::SystemAlert,
            "test",
            serde_json::json!({}),
            None,
            None,
        )
        .unwrap();
        drain(&bus).await;
        assert_eq!(events.lock().len(), 1);

        assert!(bus.unsubscribe(&token));
        bus.publish_simple(
            EventType::SystemAlert,
            "test",
            serde_json::json!({}),
            None,
            None,
        )
        .unwrap();
        drain(&bus).await;
        assert_eq!(events.lock().len(), 1);
        assert_eq!(bus.stats().handlers_registered, 0);

        bus.shutdown().await.unwrap();
    }
}
