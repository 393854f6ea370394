//! Capability registry: which handlers, middleware and notification shapes exist.
//!
//! The registry is populated once through [`RegistryBuilder`] and is immutable
//! afterwards, so concurrent dispatches read it without synchronization.
//! Handlers and middleware are stored as factories over a
//! [`ResolutionContext`]; instances are built per dispatch.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::builder()
//!     .handler::<CreateThing, _>(CreateThingHandler)
//!     .request_middleware_with_options::<CreateThing, _>(
//!         Logging,
//!         MiddlewareOptions::new().with_order(-100),
//!     )
//!     .notification_handler::<OrderPlaced, _>(SendReceipt)
//!     .notification_middleware_with_options(
//!         OrderAudit,
//!         MiddlewareOptions::new().requires::<OrderCategory>(),
//!     )
//!     .build();
//! ```

use crate::notification::{ErasedNotificationHandler, HandlerAdapter};
use crate::pipeline::{InstanceOrder, PipelineKind, ResolvedMiddleware};
use courier_core::capability::{Capability, CapabilityConstraint, CapabilitySet};
use courier_core::error::ResolveError;
use courier_core::handler::{NotificationHandler, RequestHandler, StreamRequestHandler};
use courier_core::middleware::{
    NotificationMiddleware, RequestMiddleware, StaticOrder, StreamMiddleware,
};
use courier_core::notification::Notification;
use courier_core::request::{Request, StreamRequest};
use courier_core::resolution::ResolutionContext;
use courier_core::shape::{Shape, short_type_name};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Order used when neither the instance nor the registration supplies one.
pub const DEFAULT_ORDER: i32 = 0;

/// Builds a component from the resolution context.
pub(crate) type Factory<T> =
    Arc<dyn Fn(&dyn ResolutionContext) -> Result<Arc<T>, ResolveError> + Send + Sync>;

type OrderResolver =
    Arc<dyn Fn(&dyn ResolutionContext) -> Result<Option<i32>, ResolveError> + Send + Sync>;

/// Factory returning the same shared instance every time.
fn shared<T: ?Sized + Send + Sync + 'static>(instance: Arc<T>) -> Factory<T> {
    Arc::new(move |_context: &dyn ResolutionContext| Ok(Arc::clone(&instance)))
}

/// Configuration payload attached to a middleware registration.
///
/// Keeps the typed value for the middleware's factory and a debug summary for
/// the inspector.
#[derive(Clone)]
pub struct Configuration {
    value: Arc<dyn Any + Send + Sync>,
    summary: String,
}

impl Configuration {
    /// Wrap a configuration value.
    pub fn new<C: fmt::Debug + Send + Sync + 'static>(value: C) -> Self {
        Self {
            summary: format!("{value:?}"),
            value: Arc::new(value),
        }
    }

    /// Borrow the value as `C`.
    #[must_use]
    pub fn get<C: Any>(&self) -> Option<&C> {
        self.value.downcast_ref::<C>()
    }

    /// Debug rendering of the value.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary)
    }
}

/// Per-registration middleware settings.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareOptions {
    order: Option<i32>,
    constraint: CapabilityConstraint,
    configuration: Option<Configuration>,
}

impl MiddlewareOptions {
    /// Defaults: no static order, unconstrained, no configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying the type-level order of `M`.
    #[must_use]
    pub fn from_static<M: StaticOrder>() -> Self {
        Self::new().with_order(M::ORDER)
    }

    /// Static order for this registration.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// Capability constraint. Only notification middleware honors it.
    #[must_use]
    pub fn with_constraint(mut self, constraint: CapabilityConstraint) -> Self {
        self.constraint = constraint;
        self
    }

    /// Constrain to notifications declaring capability `C`.
    #[must_use]
    pub fn requires<C: Capability>(self) -> Self {
        self.with_constraint(CapabilityConstraint::requires::<C>())
    }

    /// Attach a configuration payload.
    #[must_use]
    pub fn with_configuration<C: fmt::Debug + Send + Sync + 'static>(mut self, value: C) -> Self {
        self.configuration = Some(Configuration::new(value));
        self
    }
}

/// Category of a registered component, as seen by a [`DiscoveryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ComponentKind {
    /// Handler of a request shape
    RequestHandler,
    /// Handler of a stream request shape
    StreamHandler,
    /// Automatic handler of a notification shape
    NotificationHandler,
    /// Middleware of a request shape
    RequestMiddleware,
    /// Middleware of a stream request shape
    StreamMiddleware,
    /// Notification middleware
    NotificationMiddleware,
}

/// A component offered to the registry.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// What is being registered
    pub kind: ComponentKind,
    /// Component type name
    pub name: &'static str,
    /// Bound shape; `None` for notification middleware
    pub shape: Option<Shape>,
}

/// Decides which offered components are admitted into the registry.
pub trait DiscoveryPolicy: Send + Sync {
    /// Whether `candidate` is registered.
    fn admits(&self, candidate: &Candidate) -> bool;
}

impl<F> DiscoveryPolicy for F
where
    F: Fn(&Candidate) -> bool + Send + Sync,
{
    fn admits(&self, candidate: &Candidate) -> bool {
        self(candidate)
    }
}

/// Admits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmitAll;

impl DiscoveryPolicy for AdmitAll {
    fn admits(&self, _candidate: &Candidate) -> bool {
        true
    }
}

/// A reusable bundle of registrations.
pub trait RegistrationModule {
    /// Add this module's registrations.
    fn register(&self, builder: RegistryBuilder) -> RegistryBuilder;
}

pub(crate) struct HandlerRegistration<T: ?Sized> {
    pub(crate) name: &'static str,
    pub(crate) factory: Factory<T>,
}

pub(crate) struct MiddlewareRegistration<T: ?Sized> {
    pub(crate) name: &'static str,
    pub(crate) sequence: u64,
    pub(crate) static_order: Option<i32>,
    pub(crate) constraint: CapabilityConstraint,
    pub(crate) factory: Factory<T>,
}

impl<T: ?Sized + InstanceOrder> MiddlewareRegistration<T> {
    /// Build the instance and settle its order.
    pub(crate) fn resolve(
        &self,
        context: &dyn ResolutionContext,
    ) -> Result<ResolvedMiddleware<T>, ResolveError> {
        let instance = (self.factory)(context)?;
        let order = instance
            .instance_order()
            .or(self.static_order)
            .unwrap_or(DEFAULT_ORDER);
        Ok(ResolvedMiddleware {
            name: self.name,
            order,
            sequence: self.sequence,
            instance,
        })
    }
}

/// Non-generic view of one middleware registration, used by the inspector.
#[derive(Clone)]
pub(crate) struct MiddlewareDescriptor {
    pub(crate) name: &'static str,
    pub(crate) pipeline: PipelineKind,
    pub(crate) sequence: u64,
    pub(crate) static_order: Option<i32>,
    pub(crate) constraint: CapabilityConstraint,
    pub(crate) configuration: Option<Configuration>,
    order_resolver: OrderResolver,
}

impl MiddlewareDescriptor {
    /// Order the middleware would run at, resolved through `context`.
    pub(crate) fn resolve_order(&self, context: &dyn ResolutionContext) -> Result<i32, ResolveError> {
        let instance_order = (self.order_resolver)(context)?;
        Ok(instance_order.or(self.static_order).unwrap_or(DEFAULT_ORDER))
    }
}

pub(crate) struct RequestEntry<R: Request> {
    pub(crate) handlers: Vec<HandlerRegistration<dyn RequestHandler<R>>>,
    pub(crate) middleware: Vec<MiddlewareRegistration<dyn RequestMiddleware<R>>>,
}

impl<R: Request> Default for RequestEntry<R> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            middleware: Vec::new(),
        }
    }
}

pub(crate) struct StreamEntry<R: StreamRequest> {
    pub(crate) handlers: Vec<HandlerRegistration<dyn StreamRequestHandler<R>>>,
    pub(crate) middleware: Vec<MiddlewareRegistration<dyn StreamMiddleware<R>>>,
}

impl<R: StreamRequest> Default for StreamEntry<R> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            middleware: Vec::new(),
        }
    }
}

/// A notification shape known to the registry and the capabilities it declares.
#[derive(Debug, Clone)]
pub struct NotificationShapeInfo {
    shape: Shape,
    capabilities: CapabilitySet,
}

impl NotificationShapeInfo {
    /// Info for `N`.
    #[must_use]
    pub fn of<N: Notification>() -> Self {
        Self {
            shape: Shape::of::<N>(),
            capabilities: N::capabilities(),
        }
    }

    /// The notification shape.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    /// Statically declared capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }
}

/// Immutable catalog of handlers and middleware, keyed by shape.
#[derive(Default)]
pub struct Registry {
    requests: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    streams: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    notification_handlers: HashMap<TypeId, Vec<HandlerRegistration<dyn ErasedNotificationHandler>>>,
    notification_middleware: Vec<MiddlewareRegistration<dyn NotificationMiddleware>>,
    notification_shapes: Vec<NotificationShapeInfo>,
    request_shapes: Vec<Shape>,
    stream_shapes: Vec<Shape>,
    handler_names: HashMap<TypeId, Vec<&'static str>>,
    catalog: Vec<MiddlewareDescriptor>,
}

impl Registry {
    /// Start a registration phase.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) fn request_entry<R: Request>(&self) -> Option<&RequestEntry<R>> {
        self.requests
            .get(&TypeId::of::<R>())
            .and_then(|entry| entry.downcast_ref::<RequestEntry<R>>())
    }

    pub(crate) fn stream_entry<R: StreamRequest>(&self) -> Option<&StreamEntry<R>> {
        self.streams
            .get(&TypeId::of::<R>())
            .and_then(|entry| entry.downcast_ref::<StreamEntry<R>>())
    }

    pub(crate) fn notification_handlers(
        &self,
        shape: Shape,
    ) -> &[HandlerRegistration<dyn ErasedNotificationHandler>] {
        self.notification_handlers
            .get(&shape.type_id())
            .map_or(&[], Vec::as_slice)
    }

    pub(crate) fn notification_middleware(
        &self,
    ) -> &[MiddlewareRegistration<dyn NotificationMiddleware>] {
        &self.notification_middleware
    }

    pub(crate) fn catalog(&self) -> &[MiddlewareDescriptor] {
        &self.catalog
    }

    /// Request shapes with at least one handler or middleware, in registration order.
    #[must_use]
    pub fn request_shapes(&self) -> &[Shape] {
        &self.request_shapes
    }

    /// Stream request shapes, in registration order.
    #[must_use]
    pub fn stream_shapes(&self) -> &[Shape] {
        &self.stream_shapes
    }

    /// Notification shapes, in registration order.
    #[must_use]
    pub fn notification_shapes(&self) -> &[NotificationShapeInfo] {
        &self.notification_shapes
    }

    /// Names of every handler registered for `shape`.
    #[must_use]
    pub fn handler_names(&self, shape: Shape) -> &[&'static str] {
        self.handler_names
            .get(&shape.type_id())
            .map_or(&[], Vec::as_slice)
    }

    /// Total number of middleware registrations across all pipelines.
    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.catalog.len()
    }

    /// Number of notification middleware registrations.
    #[must_use]
    pub fn notification_middleware_count(&self) -> usize {
        self.notification_middleware.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("request_shapes", &self.request_shapes)
            .field("stream_shapes", &self.stream_shapes)
            .field("notification_shapes", &self.notification_shapes.len())
            .field("middleware", &self.catalog.len())
            .finish()
    }
}

/// Accumulates registrations, then freezes them into a [`Registry`].
///
/// Registration order is recorded with a global sequence number that breaks
/// ties between middleware of equal order.
pub struct RegistryBuilder {
    registry: Registry,
    sequence: u64,
    policy: Box<dyn DiscoveryPolicy>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Empty builder admitting every component.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Registry::default(),
            sequence: 0,
            policy: Box::new(AdmitAll),
        }
    }

    /// Filter subsequent registrations through `policy`.
    #[must_use]
    pub fn with_policy(mut self, policy: impl DiscoveryPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Apply a registration module.
    #[must_use]
    pub fn install(self, module: &impl RegistrationModule) -> Self {
        module.register(self)
    }

    /// Register a shared request handler instance.
    #[must_use]
    pub fn handler<R, H>(self, handler: H) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        let instance: Arc<dyn RequestHandler<R>> = Arc::new(handler);
        self.add_request_handler::<R>(short_type_name::<H>(), shared(instance))
    }

    /// Register a request handler built per dispatch.
    #[must_use]
    pub fn handler_factory<R, H, F>(self, factory: F) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
        F: Fn(&dyn ResolutionContext) -> Result<H, ResolveError> + Send + Sync + 'static,
    {
        let factory: Factory<dyn RequestHandler<R>> =
            Arc::new(move |context: &dyn ResolutionContext| {
                factory(context).map(|handler| Arc::new(handler) as Arc<dyn RequestHandler<R>>)
            });
        self.add_request_handler::<R>(short_type_name::<H>(), factory)
    }

    /// Register a shared stream handler instance.
    #[must_use]
    pub fn stream_handler<R, H>(self, handler: H) -> Self
    where
        R: StreamRequest,
        H: StreamRequestHandler<R>,
    {
        let instance: Arc<dyn StreamRequestHandler<R>> = Arc::new(handler);
        self.add_stream_handler::<R>(short_type_name::<H>(), shared(instance))
    }

    /// Register a stream handler built per dispatch.
    #[must_use]
    pub fn stream_handler_factory<R, H, F>(self, factory: F) -> Self
    where
        R: StreamRequest,
        H: StreamRequestHandler<R>,
        F: Fn(&dyn ResolutionContext) -> Result<H, ResolveError> + Send + Sync + 'static,
    {
        let factory: Factory<dyn StreamRequestHandler<R>> =
            Arc::new(move |context: &dyn ResolutionContext| {
                factory(context)
                    .map(|handler| Arc::new(handler) as Arc<dyn StreamRequestHandler<R>>)
            });
        self.add_stream_handler::<R>(short_type_name::<H>(), factory)
    }

    /// Register a shared automatic notification handler.
    #[must_use]
    pub fn notification_handler<N, H>(self, handler: H) -> Self
    where
        N: Notification,
        H: NotificationHandler<N>,
    {
        let adapter: Arc<dyn ErasedNotificationHandler> =
            Arc::new(HandlerAdapter::<N>::new(Arc::new(handler)));
        self.add_notification_handler::<N>(short_type_name::<H>(), shared(adapter))
    }

    /// Register an automatic notification handler built per publish.
    #[must_use]
    pub fn notification_handler_factory<N, H, F>(self, factory: F) -> Self
    where
        N: Notification,
        H: NotificationHandler<N>,
        F: Fn(&dyn ResolutionContext) -> Result<H, ResolveError> + Send + Sync + 'static,
    {
        let factory: Factory<dyn ErasedNotificationHandler> =
            Arc::new(move |context: &dyn ResolutionContext| {
                factory(context).map(|handler| {
                    Arc::new(HandlerAdapter::<N>::new(Arc::new(handler)))
                        as Arc<dyn ErasedNotificationHandler>
                })
            });
        self.add_notification_handler::<N>(short_type_name::<H>(), factory)
    }

    /// Make a notification shape known without an automatic handler.
    ///
    /// Shapes only reached through manual subscribers register here so the
    /// inspector can report on them.
    #[must_use]
    pub fn register_notification<N: Notification>(mut self) -> Self {
        self.note_notification_shape::<N>();
        self
    }

    /// Register request middleware with default options.
    #[must_use]
    pub fn request_middleware<R, M>(self, middleware: M) -> Self
    where
        R: Request,
        M: RequestMiddleware<R>,
    {
        self.request_middleware_with_options::<R, M>(middleware, MiddlewareOptions::default())
    }

    /// Register request middleware with explicit options.
    #[must_use]
    pub fn request_middleware_with_options<R, M>(
        self,
        middleware: M,
        options: MiddlewareOptions,
    ) -> Self
    where
        R: Request,
        M: RequestMiddleware<R>,
    {
        let instance: Arc<dyn RequestMiddleware<R>> = Arc::new(middleware);
        self.add_request_middleware::<R>(short_type_name::<M>(), options, shared(instance))
    }

    /// Register request middleware built per dispatch.
    ///
    /// The factory receives the configuration attached to `options`, if any.
    #[must_use]
    pub fn request_middleware_factory<R, M, F>(self, options: MiddlewareOptions, factory: F) -> Self
    where
        R: Request,
        M: RequestMiddleware<R>,
        F: Fn(&dyn ResolutionContext, Option<&Configuration>) -> Result<M, ResolveError>
            + Send
            + Sync
            + 'static,
    {
        let configuration = options.configuration.clone();
        let factory: Factory<dyn RequestMiddleware<R>> =
            Arc::new(move |context: &dyn ResolutionContext| {
                factory(context, configuration.as_ref())
                    .map(|middleware| Arc::new(middleware) as Arc<dyn RequestMiddleware<R>>)
            });
        self.add_request_middleware::<R>(short_type_name::<M>(), options, factory)
    }

    /// Register stream middleware with default options.
    #[must_use]
    pub fn stream_middleware<R, M>(self, middleware: M) -> Self
    where
        R: StreamRequest,
        M: StreamMiddleware<R>,
    {
        self.stream_middleware_with_options::<R, M>(middleware, MiddlewareOptions::default())
    }

    /// Register stream middleware with explicit options.
    #[must_use]
    pub fn stream_middleware_with_options<R, M>(
        self,
        middleware: M,
        options: MiddlewareOptions,
    ) -> Self
    where
        R: StreamRequest,
        M: StreamMiddleware<R>,
    {
        let instance: Arc<dyn StreamMiddleware<R>> = Arc::new(middleware);
        self.add_stream_middleware::<R>(short_type_name::<M>(), options, shared(instance))
    }

    /// Register stream middleware built per dispatch from the context and
    /// the registration's configuration.
    #[must_use]
    pub fn stream_middleware_factory<R, M, F>(self, options: MiddlewareOptions, factory: F) -> Self
    where
        R: StreamRequest,
        M: StreamMiddleware<R>,
        F: Fn(&dyn ResolutionContext, Option<&Configuration>) -> Result<M, ResolveError>
            + Send
            + Sync
            + 'static,
    {
        let configuration = options.configuration.clone();
        let factory: Factory<dyn StreamMiddleware<R>> =
            Arc::new(move |context: &dyn ResolutionContext| {
                factory(context, configuration.as_ref())
                    .map(|middleware| Arc::new(middleware) as Arc<dyn StreamMiddleware<R>>)
            });
        self.add_stream_middleware::<R>(short_type_name::<M>(), options, factory)
    }

    /// Register unconstrained notification middleware.
    #[must_use]
    pub fn notification_middleware<M: NotificationMiddleware>(self, middleware: M) -> Self {
        self.notification_middleware_with_options(middleware, MiddlewareOptions::default())
    }

    /// Register notification middleware with order, constraint or configuration.
    #[must_use]
    pub fn notification_middleware_with_options<M: NotificationMiddleware>(
        self,
        middleware: M,
        options: MiddlewareOptions,
    ) -> Self {
        let instance: Arc<dyn NotificationMiddleware> = Arc::new(middleware);
        self.add_notification_middleware(short_type_name::<M>(), options, shared(instance))
    }

    /// Register notification middleware built per publish.
    ///
    /// The factory sees the configuration attached to `options`, so an
    /// instance order taken from it is what both the inspector and publish use.
    #[must_use]
    pub fn notification_middleware_factory<M, F>(self, options: MiddlewareOptions, factory: F) -> Self
    where
        M: NotificationMiddleware,
        F: Fn(&dyn ResolutionContext, Option<&Configuration>) -> Result<M, ResolveError>
            + Send
            + Sync
            + 'static,
    {
        let configuration = options.configuration.clone();
        let factory: Factory<dyn NotificationMiddleware> =
            Arc::new(move |context: &dyn ResolutionContext| {
                factory(context, configuration.as_ref())
                    .map(|middleware| Arc::new(middleware) as Arc<dyn NotificationMiddleware>)
            });
        self.add_notification_middleware(short_type_name::<M>(), options, factory)
    }

    /// Freeze the registrations.
    #[must_use]
    pub fn build(self) -> Registry {
        tracing::debug!(
            requests = self.registry.request_shapes.len(),
            streams = self.registry.stream_shapes.len(),
            notifications = self.registry.notification_shapes.len(),
            middleware = self.registry.catalog.len(),
            "Registry built"
        );
        self.registry
    }

    fn admits(&self, kind: ComponentKind, name: &'static str, shape: Option<Shape>) -> bool {
        let candidate = Candidate { kind, name, shape };
        let admitted = self.policy.admits(&candidate);
        if !admitted {
            tracing::debug!(?kind, component = name, "Registration rejected by discovery policy");
        }
        admitted
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        sequence
    }

    fn note_handler(&mut self, shape: Shape, name: &'static str) {
        self.registry
            .handler_names
            .entry(shape.type_id())
            .or_default()
            .push(name);
    }

    fn note_notification_shape<N: Notification>(&mut self) {
        let shape = Shape::of::<N>();
        if !self.registry.notification_shapes.iter().any(|info| info.shape == shape) {
            self.registry.notification_shapes.push(NotificationShapeInfo::of::<N>());
        }
    }

    fn update_request_entry<R: Request>(&mut self, update: impl FnOnce(&mut RequestEntry<R>)) {
        let shape = Shape::of::<R>();
        let mut entry = self
            .registry
            .requests
            .remove(&shape.type_id())
            .and_then(|entry| entry.downcast::<RequestEntry<R>>().ok())
            .map_or_else(RequestEntry::default, |entry| *entry);
        update(&mut entry);
        if !self.registry.request_shapes.contains(&shape) {
            self.registry.request_shapes.push(shape);
        }
        self.registry.requests.insert(shape.type_id(), Box::new(entry));
    }

    fn update_stream_entry<R: StreamRequest>(&mut self, update: impl FnOnce(&mut StreamEntry<R>)) {
        let shape = Shape::of::<R>();
        let mut entry = self
            .registry
            .streams
            .remove(&shape.type_id())
            .and_then(|entry| entry.downcast::<StreamEntry<R>>().ok())
            .map_or_else(StreamEntry::default, |entry| *entry);
        update(&mut entry);
        if !self.registry.stream_shapes.contains(&shape) {
            self.registry.stream_shapes.push(shape);
        }
        self.registry.streams.insert(shape.type_id(), Box::new(entry));
    }

    fn add_request_handler<R: Request>(
        mut self,
        name: &'static str,
        factory: Factory<dyn RequestHandler<R>>,
    ) -> Self {
        let shape = Shape::of::<R>();
        if !self.admits(ComponentKind::RequestHandler, name, Some(shape)) {
            return self;
        }
        self.note_handler(shape, name);
        self.update_request_entry::<R>(|entry| {
            entry.handlers.push(HandlerRegistration { name, factory });
        });
        self
    }

    fn add_stream_handler<R: StreamRequest>(
        mut self,
        name: &'static str,
        factory: Factory<dyn StreamRequestHandler<R>>,
    ) -> Self {
        let shape = Shape::of::<R>();
        if !self.admits(ComponentKind::StreamHandler, name, Some(shape)) {
            return self;
        }
        self.note_handler(shape, name);
        self.update_stream_entry::<R>(|entry| {
            entry.handlers.push(HandlerRegistration { name, factory });
        });
        self
    }

    fn add_notification_handler<N: Notification>(
        mut self,
        name: &'static str,
        factory: Factory<dyn ErasedNotificationHandler>,
    ) -> Self {
        let shape = Shape::of::<N>();
        if !self.admits(ComponentKind::NotificationHandler, name, Some(shape)) {
            return self;
        }
        self.note_handler(shape, name);
        self.note_notification_shape::<N>();
        self.registry
            .notification_handlers
            .entry(shape.type_id())
            .or_default()
            .push(HandlerRegistration { name, factory });
        self
    }

    fn add_request_middleware<R: Request>(
        mut self,
        name: &'static str,
        options: MiddlewareOptions,
        factory: Factory<dyn RequestMiddleware<R>>,
    ) -> Self {
        let shape = Shape::of::<R>();
        if !self.admits(ComponentKind::RequestMiddleware, name, Some(shape)) {
            return self;
        }
        if !options.constraint.is_general() {
            tracing::debug!(
                middleware = name,
                "Capability constraints only apply to notification middleware; ignoring"
            );
        }
        let registration = self.middleware_registration(name, PipelineKind::Request(shape), options, factory);
        self.update_request_entry::<R>(|entry| entry.middleware.push(registration));
        self
    }

    fn add_stream_middleware<R: StreamRequest>(
        mut self,
        name: &'static str,
        options: MiddlewareOptions,
        factory: Factory<dyn StreamMiddleware<R>>,
    ) -> Self {
        let shape = Shape::of::<R>();
        if !self.admits(ComponentKind::StreamMiddleware, name, Some(shape)) {
            return self;
        }
        let registration = self.middleware_registration(name, PipelineKind::Stream(shape), options, factory);
        self.update_stream_entry::<R>(|entry| entry.middleware.push(registration));
        self
    }

    fn add_notification_middleware(
        mut self,
        name: &'static str,
        options: MiddlewareOptions,
        factory: Factory<dyn NotificationMiddleware>,
    ) -> Self {
        if !self.admits(ComponentKind::NotificationMiddleware, name, None) {
            return self;
        }
        let registration = self.middleware_registration(name, PipelineKind::Notification, options, factory);
        self.registry.notification_middleware.push(registration);
        self
    }

    /// Assign a sequence number and record the catalog entry.
    fn middleware_registration<T>(
        &mut self,
        name: &'static str,
        pipeline: PipelineKind,
        options: MiddlewareOptions,
        factory: Factory<T>,
    ) -> MiddlewareRegistration<T>
    where
        T: ?Sized + InstanceOrder + Send + Sync + 'static,
    {
        let sequence = self.next_sequence();
        let constraint = match pipeline {
            PipelineKind::Notification => options.constraint,
            PipelineKind::Request(_) | PipelineKind::Stream(_) => CapabilityConstraint::General,
        };
        let resolver_factory = Arc::clone(&factory);
        let order_resolver: OrderResolver = Arc::new(move |context: &dyn ResolutionContext| {
            resolver_factory(context).map(|instance| instance.instance_order())
        });
        self.registry.catalog.push(MiddlewareDescriptor {
            name,
            pipeline,
            sequence,
            static_order: options.order,
            constraint: constraint.clone(),
            configuration: options.configuration,
            order_resolver,
        });
        MiddlewareRegistration {
            name,
            sequence,
            static_order: options.order,
            constraint,
            factory,
        }
    }
}
