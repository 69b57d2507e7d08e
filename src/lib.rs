//! # SYNAPSE - Multi-Engine AI Inference Coordination Core
//!
//! The scheduling and coordination spine for a multi-engine AI system.
//!
//! ## Architecture
//!
//! - `scheduler`: priority-aware adaptive batch scheduling over a shared
//!   inference backend, with deadline enforcement and memory-pressure
//!   throttling
//! - `bus`: typed, priority-ordered, in-process publish/subscribe with
//!   targeted routing and handler-failure isolation
//! - `container`: dependency-injection container resolving engine
//!   interfaces to concrete implementations, with cycle detection
//! - `memory`: O(1) content-addressable associative memory over hashed
//!   n-grams, RAM or disk-backed
//! - `cache`: TTL-bounded LRU result caches, one per engine class
//! - `engines`: the interface seams the three inference engines are
//!   resolved through
//!
//! Engines submit work through the scheduler, exchange intermediate
//! results over the bus, and obtain each other's services from the
//! container, never by direct import.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Event bus
pub mod bus;

// Per-engine result caching
pub mod cache;

// Dependency-injection container
pub mod container;

// Engine interface seams
pub mod engines;

// Associative memory
pub mod memory;

// Adaptive batch scheduler
pub mod scheduler;

// Re-export commonly used types
pub use bus::{Event, EventBus, EventHandler, EventPriority, EventType};
pub use cache::{EngineCacheManager, ResultCache};
pub use container::{ContainerError, Lifecycle, ServiceContainer};
pub use memory::{EngramStore, MemoryConfig, MemoryError, StorageBackend};
pub use scheduler::{
    AdaptiveBatchScheduler, BatchConfig, CompletionStatus, InferenceBackend, InferenceRequest,
    RequestPriority, SchedulerError,
};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
