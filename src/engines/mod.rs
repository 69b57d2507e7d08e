//! Engine interface seams
//!
//! The three inference engines are external collaborators; the core
//! depends only on these traits. Concrete implementations are mapped
//! to the traits in the [`crate::container::ServiceContainer`] by the
//! surrounding program, which keeps the engine crates leaf-level and
//! breaks what would otherwise be circular imports between them.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine initialization failed: {0}")]
    Initialization(String),

    #[error("Engine operation failed: {0}")]
    Operation(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Low-latency decision engine ("soldier" class, ~10 ms budget).
#[async_trait]
pub trait SoldierEngine: Send + Sync {
    /// Prepare the engine for use.
    async fn initialize(&self) -> EngineResult<()>;

    /// Produce a real-time decision from the given context.
    async fn decide(&self, context: Value) -> EngineResult<Value>;
}

/// Medium-latency strategy engine ("commander" class, ~200 ms budget).
#[async_trait]
pub trait CommanderEngine: Send + Sync {
    /// Prepare the engine for use.
    async fn initialize(&self) -> EngineResult<()>;

    /// Analyze the given context into a strategy proposal.
    async fn analyze(&self, context: Value) -> EngineResult<Value>;
}

/// Long-latency research engine ("scholar" class, ~1 s budget).
#[async_trait]
pub trait ScholarEngine: Send + Sync {
    /// Prepare the engine for use.
    async fn initialize(&self) -> EngineResult<()>;

    /// Research a topic against the given context.
    async fn research(&self, topic: &str, context: Value) -> EngineResult<Value>;
}
