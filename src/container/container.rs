//! Service container with factory registration and cycle detection
//!
//! Engines never import each other; they depend on interface traits and
//! obtain concrete implementations here at runtime. Registration is
//! explicit: every service supplies a factory closure that receives
//! the container and resolves its own dependencies through it. That
//! recursion is what builds dependency chains, and it is also where
//! cycles would bite: a currently-resolving set catches any service
//! re-entered before its own construction finished.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::ReentrantMutex;
use serde::Serialize;
use thiserror::Error;

/// Container errors
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Service not registered: {0}")]
    Unregistered(&'static str),

    #[error("Circular dependency detected for {0}")]
    CircularDependency(&'static str),

    #[error("Service construction failed: {0}")]
    ConstructionFailed(String),
}

/// Result type for container operations
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Instance lifetime managed by the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// At most one instance process-wide
    Singleton,
    /// A fresh instance on every resolve
    Transient,
    /// Cached per scope; the container itself opens no scopes, so a
    /// wrapping scope manager decides instance lifetime
    Scoped,
}

type StoredInstance = Arc<dyn Any + Send + Sync>;
type StoredFactory =
    Arc<dyn Fn(&ServiceContainer) -> ContainerResult<StoredInstance> + Send + Sync>;

struct Descriptor {
    type_name: &'static str,
    lifecycle: Lifecycle,
    factory: Option<StoredFactory>,
    instance: Option<StoredInstance>,
    created_at: Option<DateTime<Utc>>,
    access_count: u64,
}

/// Registration metadata for one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Interface type name
    pub service_type: String,
    /// Configured lifecycle
    pub lifecycle: Lifecycle,
    /// Whether a constructed (or pre-built) instance is cached
    pub has_instance: bool,
    /// When the cached instance was created
    pub created_at: Option<DateTime<Utc>>,
    /// How many times the service has been resolved
    pub access_count: u64,
}

struct State {
    services: HashMap<TypeId, Descriptor>,
    resolving: HashSet<TypeId>,
}

/// Registry of service descriptors with lifecycle-scoped resolution.
///
/// Thread safety relies on a re-entrant lock: a factory invoked during
/// `resolve` may itself call `resolve` on the same thread without
/// deadlocking, which is exactly how dependency chains are built.
pub struct ServiceContainer {
    state: ReentrantMutex<RefCell<State>>,
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(State {
                services: HashMap::new(),
                resolving: HashSet::new(),
            })),
        }
    }

    /// Register a singleton: the factory runs at most once and the
    /// instance is cached process-wide.
    pub fn register_singleton<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> ContainerResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register_with::<T, F>(Lifecycle::Singleton, factory)
    }

    /// Register a transient: every resolve constructs anew.
    pub fn register_transient<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> ContainerResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register_with::<T, F>(Lifecycle::Transient, factory)
    }

    /// Register a scoped service. The core container does not open
    /// scopes itself, so resolution constructs anew like a transient;
    /// wrapping scope managers cache per scope.
    pub fn register_scoped<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> ContainerResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register_with::<T, F>(Lifecycle::Scoped, factory)
    }

    /// Register a nullary factory as a singleton.
    pub fn register_factory<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> ContainerResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register_with::<T, _>(Lifecycle::Singleton, move |_container| factory())
    }

    /// Register a pre-built singleton instance.
    pub fn register_instance<T>(&self, instance: Arc<T>) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.services.insert(
            TypeId::of::<T>(),
            Descriptor {
                type_name: type_name::<T>(),
                lifecycle: Lifecycle::Singleton,
                factory: None,
                instance: Some(Arc::new(instance) as StoredInstance),
                created_at: Some(Utc::now()),
                access_count: 0,
            },
        );
        log::debug!("Registered instance for {}", type_name::<T>());
        self
    }

    fn register_with<T, F>(&self, lifecycle: Lifecycle, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> ContainerResult<Arc<T>> + Send + Sync + 'static,
    {
        let wrapped: StoredFactory = Arc::new(move |container| {
            factory(container).map(|service| Arc::new(service) as StoredInstance)
        });

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.services.insert(
            TypeId::of::<T>(),
            Descriptor {
                type_name: type_name::<T>(),
                lifecycle,
                factory: Some(wrapped),
                instance: None,
                created_at: None,
                access_count: 0,
            },
        );
        log::debug!("Registered {lifecycle:?} {}", type_name::<T>());
        self
    }

    /// Resolve an instance of `T`.
    ///
    /// Fails with [`ContainerError::Unregistered`] when no descriptor
    /// exists and with [`ContainerError::CircularDependency`] when `T`
    /// is re-entered while already under construction. Factory errors
    /// propagate unchanged; the currently-resolving mark is cleared on
    /// every exit path so later attempts are not falsely rejected.
    pub fn resolve<T>(&self) -> ContainerResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = TypeId::of::<T>();
        let name = type_name::<T>();
        let guard = self.state.lock();

        let factory = {
            let mut state = guard.borrow_mut();

            if state.resolving.contains(&key) {
                return Err(ContainerError::CircularDependency(name));
            }

            let descriptor = state
                .services
                .get_mut(&key)
                .ok_or(ContainerError::Unregistered(name))?;

            if let Some(instance) = descriptor
                .instance
                .clone()
                .filter(|_| descriptor.lifecycle == Lifecycle::Singleton)
            {
                descriptor.access_count += 1;
                return downcast::<T>(instance, name);
            }

            let factory = descriptor
                .factory
                .clone()
                .ok_or_else(|| {
                    ContainerError::ConstructionFailed(format!(
                        "no factory or instance for {name}"
                    ))
                })?;

            state.resolving.insert(key);
            factory
        };

        // The resolving mark outlives the factory call; its drop guard
        // clears it even if the factory errors or panics.
        let _resolving = ResolvingMark {
            container: self,
            key,
        };

        // RefCell borrows are released here, so the factory is free to
        // call resolve() recursively on this thread.
        let produced = factory(self)?;

        {
            let mut state = guard.borrow_mut();
            if let Some(descriptor) = state.services.get_mut(&key) {
                descriptor.access_count += 1;
                if descriptor.lifecycle == Lifecycle::Singleton && descriptor.instance.is_none() {
                    descriptor.instance = Some(produced.clone());
                    descriptor.created_at = Some(Utc::now());
                    log::debug!("Cached singleton instance of {name}");
                }
            }
        }

        downcast::<T>(produced, name)
    }

    /// Whether a descriptor exists for `T`.
    pub fn is_registered<T>(&self) -> bool
    where
        T: ?Sized + 'static,
    {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.services.contains_key(&TypeId::of::<T>())
    }

    /// Registration metadata for `T`, if registered.
    pub fn service_info<T>(&self) -> Option<ServiceInfo>
    where
        T: ?Sized + 'static,
    {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.services.get(&TypeId::of::<T>()).map(describe)
    }

    /// Metadata for every registered service.
    pub fn list_services(&self) -> Vec<ServiceInfo> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.services.values().map(describe).collect()
    }

    /// Drop every registration and cached instance.
    pub fn clear(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.services.clear();
        state.resolving.clear();
        log::info!("Service container cleared");
    }
}

fn describe(descriptor: &Descriptor) -> ServiceInfo {
    ServiceInfo {
        service_type: descriptor.type_name.to_string(),
        lifecycle: descriptor.lifecycle,
        has_instance: descriptor.instance.is_some(),
        created_at: descriptor.created_at,
        access_count: descriptor.access_count,
    }
}

fn downcast<T>(instance: StoredInstance, name: &'static str) -> ContainerResult<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    instance
        .downcast::<Arc<T>>()
        .map(|wrapped| (*wrapped).clone())
        .map_err(|_| {
            ContainerError::ConstructionFailed(format!("stored service is not an Arc<{name}>"))
        })
}

struct ResolvingMark<'a> {
    container: &'a ServiceContainer,
    key: TypeId,
}

impl Drop for ResolvingMark<'_> {
    fn drop(&mut self) {
        let guard = self.container.state.lock();
        guard.borrow_mut().resolving.remove(&self.key);
    }
}

static GLOBAL_CONTAINER: Lazy<ServiceContainer> = Lazy::new(ServiceContainer::new);

/// Process-global container, for programs that wire engines at startup.
pub fn global() -> &'static ServiceContainer {
    &GLOBAL_CONTAINER
}
