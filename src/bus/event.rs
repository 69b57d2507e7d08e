//! Event types carried by the bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed vocabulary of events the engines exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// An engine finished an analysis pass
    AnalysisCompleted,
    /// A strategy proposal was produced
    StrategyGenerated,
    /// A strategy proposal is being requested
    StrategyRequest,
    /// A concrete decision was taken
    DecisionMade,
    /// A decision is being requested
    DecisionRequest,
    /// A candidate factor was discovered by research
    FactorDiscovered,
    /// A research pass is being requested
    ResearchRequest,
    /// Fresh market data arrived
    MarketDataReceived,
    /// Market data is being requested
    MarketDataRequest,
    /// An audit pass is being requested
    AuditRequest,
    /// An audit pass finished
    AuditCompleted,
    /// The associative memory was updated
    MemoryUpdated,
    /// Operational alert
    SystemAlert,
    /// Operational query
    SystemQuery,
}

/// Delivery priority for events.
///
/// Semantically distinct from the scheduler's request priority; a
/// smaller value dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    /// Dispatched before everything else
    Critical = 1,
    /// Urgent but not preemptive
    High = 2,
    /// Default
    Normal = 3,
    /// Background
    Low = 4,
}

impl EventPriority {
    /// All priorities, highest first.
    pub const ALL: [EventPriority; 4] = [
        EventPriority::Critical,
        EventPriority::High,
        EventPriority::Normal,
        EventPriority::Low,
    ];

    /// Queue-lane index in `[0, 4)`.
    pub fn lane(self) -> usize {
        self as usize - 1
    }
}

/// A single published event. Immutable once accepted by the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonically allocated by the bus at publication
    pub event_id: u64,
    /// Event kind
    pub event_type: EventType,
    /// Name of the publishing module
    pub source_module: String,
    /// When present, only handlers whose id contains this string receive
    /// the event; when absent the event is broadcast
    pub target_module: Option<String>,
    /// Dispatch priority
    pub priority: EventPriority,
    /// Structured payload
    pub data: serde_json::Value,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Create a broadcast event with `Normal` priority.
    ///
    /// The event id is assigned by the bus when published.
    pub fn new(
        event_type: EventType,
        source_module: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: 0,
            event_type,
            source_module: source_module.into(),
            target_module: None,
            priority: EventPriority::Normal,
            data,
            created_at: Utc::now(),
        }
    }

    /// Set the dispatch priority.
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Restrict delivery to handlers whose id contains `target`.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_module = Some(target.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = Event::new(
            EventType::AnalysisCompleted,
            "commander",
            serde_json::json!({"score": 0.9}),
        )
        .with_priority(EventPriority::High)
        .with_target("scholar");

        assert_eq!(event.event_type, EventType::AnalysisCompleted);
        assert_eq!(event.priority, EventPriority::High);
        assert_eq!(event.target_module.as_deref(), Some("scholar"));
        assert_eq!(event.data["score"], 0.9);
    }

    #[test]
    fn test_priority_ordering_and_lanes() {
        assert!(EventPriority::Critical < EventPriority::Low);
        assert_eq!(EventPriority::Critical.lane(), 0);
        assert_eq!(EventPriority::Low.lane(), 3);
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = Event::new(EventType::SystemAlert, "monitor", serde_json::json!({}));

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, EventType::SystemAlert);
        assert_eq!(back.source_module, "monitor");
    }
}
