//! The narrow contract the engine needs from a dependency container.
//!
//! The engine never constructs handlers or middleware itself. Registered
//! factories receive a [`ResolutionContext`] and pull whatever they depend on
//! from it (options, repositories, clocks). Any container can back the
//! context; [`ServiceMap`] is a small type-map implementation for tests and
//! simple hosts.

use crate::error::ResolveError;
use crate::shape::short_type_name;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A shared, type-erased service instance.
pub type AnyService = Arc<dyn Any + Send + Sync>;

/// Resolves zero or more instances of a requested kind.
///
/// Must be safe to call repeatedly during a single dispatch.
pub trait ResolutionContext: Send + Sync {
    /// Every instance registered for `kind`, in registration order.
    fn resolve_all(&self, kind: TypeId) -> Vec<AnyService>;

    /// Zero or one instance of `kind`. When several exist the last registration wins.
    fn resolve_optional_any(&self, kind: TypeId) -> Option<AnyService> {
        self.resolve_all(kind).pop()
    }
}

/// Typed helpers over any [`ResolutionContext`].
pub trait ResolveExt {
    /// Every instance of `T`.
    fn resolve<T: Any + Send + Sync>(&self) -> Vec<Arc<T>>;

    /// Zero or one instance of `T`.
    fn resolve_optional<T: Any + Send + Sync>(&self) -> Option<Arc<T>>;

    /// Exactly one instance of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Missing`] when no instance is registered.
    fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ResolveError> {
        self.resolve_optional::<T>()
            .ok_or(ResolveError::Missing(short_type_name::<T>()))
    }
}

impl<C: ResolutionContext + ?Sized> ResolveExt for C {
    fn resolve<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        self.resolve_all(TypeId::of::<T>())
            .into_iter()
            .filter_map(|service| service.downcast::<T>().ok())
            .collect()
    }

    fn resolve_optional<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.resolve_optional_any(TypeId::of::<T>())
            .and_then(|service| service.downcast::<T>().ok())
    }
}

/// Type-map backed [`ResolutionContext`].
///
/// # Example
///
/// ```
/// use courier_core::resolution::{ResolveExt, ServiceMap};
///
/// #[derive(Debug)]
/// struct AuditOptions {
///     order: i32,
/// }
///
/// let services = ServiceMap::new().with(AuditOptions { order: -50 });
/// let options = services.require::<AuditOptions>();
/// assert_eq!(options.map(|o| o.order), Ok(-50));
/// ```
#[derive(Default, Clone)]
pub struct ServiceMap {
    services: HashMap<TypeId, Vec<AnyService>>,
}

impl ServiceMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an owned instance (builder style).
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.insert(Arc::new(service));
        self
    }

    /// Register a shared instance. Earlier registrations of `T` are kept.
    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.services
            .entry(TypeId::of::<T>())
            .or_default()
            .push(service);
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ResolutionContext for ServiceMap {
    fn resolve_all(&self, kind: TypeId) -> Vec<AnyService> {
        self.services.get(&kind).cloned().unwrap_or_default()
    }
}

impl std::fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMap")
            .field("kinds", &self.services.len())
            .finish()
    }
}
