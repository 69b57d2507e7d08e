//! Dependency-injection container
//!
//! This module provides:
//! - A registry mapping interface identities to construction recipes
//! - Lifecycle-scoped instantiation (singleton / transient / scoped)
//! - Cycle detection at resolution time
//! - A process-global container for wiring engines together

pub mod container;

pub use container::{
    global, ContainerError, ContainerResult, Lifecycle, ServiceContainer, ServiceInfo,
};
