//! Typed, priority-ordered, in-process publish/subscribe
//!
//! This module provides:
//! - A closed event vocabulary shared by every engine
//! - Priority-ordered dispatch with FIFO within a priority
//! - Targeted routing by handler-id substring match
//! - Handler-failure isolation and delivery statistics

pub mod bus;
pub mod event;

pub use bus::{BusError, BusResult, BusStats, EventBus, EventHandler, FnHandler, SubscriptionToken};
pub use event::{Event, EventPriority, EventType};
