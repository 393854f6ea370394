//! # Courier Runtime
//!
//! The dispatch engine for the Courier in-process mediator.
//!
//! ## Core Components
//!
//! - **Registry**: immutable catalog of handlers and middleware, built once
//! - **Pipeline composer**: folds ordered middleware around a terminal step
//! - **Mediator**: `send`, `publish`, `create_stream` and subscriptions
//! - **Inspector**: read-only analysis of which middleware runs and why
//! - **Trackers**: per-session statistics and weakly held subscribers
//!
//! ## Example
//!
//! ```ignore
//! use courier_core::prelude::*;
//! use courier_runtime::{Mediator, Registry};
//!
//! let registry = Registry::builder()
//!     .handler::<CreateThing, _>(CreateThingHandler)
//!     .notification_handler::<ThingCreated, _>(SendWelcome)
//!     .build();
//! let mediator = Mediator::new(registry, ServiceMap::new());
//!
//! let id = mediator.send(CreateThing { name: "kettle".into() }).await?;
//! mediator.publish(ThingCreated { id }).await?;
//! ```

/// Metrics for dispatch observability
pub mod metrics;

/// Capability registry and its builder
pub mod registry;

/// Pipeline composition and execution records
pub mod pipeline;

/// Notification processors and fan-out
pub mod notification;

/// Pipeline inspector and constraint analyzer
pub mod inspector;

/// Global and per-session dispatch counters
pub mod statistics;

/// Manual subscription tracking
pub mod subscribers;

/// Mediator configuration
pub mod config {
    use crate::notification::FanOutStrategy;
    use crate::statistics::SessionId;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Configuration for a [`Mediator`](crate::Mediator).
    ///
    /// # Example
    ///
    /// ```
    /// use courier_runtime::config::MediatorConfig;
    /// use courier_runtime::notification::FanOutStrategy;
    /// use std::time::Duration;
    ///
    /// let config = MediatorConfig::default()
    ///     .with_fan_out(FanOutStrategy::Concurrent)
    ///     .with_session_idle_timeout(Duration::from_secs(300));
    /// assert!(config.statistics_enabled);
    /// ```
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MediatorConfig {
        /// How notification processors are run
        pub fan_out: FanOutStrategy,
        /// Whether dispatches are counted by the statistics tracker
        pub statistics_enabled: bool,
        /// Sessions idle this long are evicted by maintenance
        pub session_idle_timeout: Duration,
        /// Period of the maintenance task
        pub maintenance_interval: Duration,
    }

    impl MediatorConfig {
        /// Set the fan-out strategy
        #[must_use]
        pub const fn with_fan_out(mut self, fan_out: FanOutStrategy) -> Self {
            self.fan_out = fan_out;
            self
        }

        /// Enable or disable statistics
        #[must_use]
        pub const fn with_statistics(mut self, enabled: bool) -> Self {
            self.statistics_enabled = enabled;
            self
        }

        /// Set the session idle timeout
        #[must_use]
        pub const fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
            self.session_idle_timeout = timeout;
            self
        }

        /// Set the maintenance period
        #[must_use]
        pub const fn with_maintenance_interval(mut self, interval: Duration) -> Self {
            self.maintenance_interval = interval;
            self
        }
    }

    impl Default for MediatorConfig {
        fn default() -> Self {
            Self {
                fan_out: FanOutStrategy::Sequential,
                statistics_enabled: true,
                session_idle_timeout: Duration::from_secs(30 * 60),
                maintenance_interval: Duration::from_secs(60),
            }
        }
    }

    /// Per-call dispatch options.
    #[derive(Debug, Clone, Default)]
    pub struct DispatchOptions {
        /// Session the dispatch is counted under
        pub session: Option<SessionId>,
        /// Cancellation signal threaded through the pipeline
        pub cancellation: CancellationToken,
    }

    impl DispatchOptions {
        /// No session, fresh token.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Count the dispatch under `session`.
        #[must_use]
        pub fn with_session(mut self, session: impl Into<SessionId>) -> Self {
            self.session = Some(session.into());
            self
        }

        /// Observe `cancellation`.
        #[must_use]
        pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
            self.cancellation = cancellation;
            self
        }
    }
}

pub use config::{DispatchOptions, MediatorConfig};

/// The mediator
pub mod mediator {
    use crate::config::{DispatchOptions, MediatorConfig};
    use crate::inspector::PipelineInspector;
    use crate::metrics::DispatchMetrics;
    use crate::notification::{NotificationProcessor, Verdict, evaluate_constraint, fan_out};
    use crate::pipeline::{
        PipelineExecutionRecord, PipelineKind, StepRecorder, compose_notification, compose_request,
        compose_stream, order_middleware, request_terminal, stream_terminal, until_cancelled,
    };
    use crate::registry::Registry;
    use crate::statistics::StatisticsTracker;
    use crate::subscribers::{SubscriberTracker, Subscription};
    use courier_core::environment::{Clock, SystemClock};
    use courier_core::error::DispatchError;
    use courier_core::handler::{GenericSubscriber, NotificationSubscriber};
    use courier_core::middleware::{ItemStream, NotificationInvoker, RequestInvoker, StreamInvoker};
    use courier_core::notification::{Notification, NotificationEnvelope};
    use courier_core::request::{Command, Request, RequestKind, StreamRequest};
    use courier_core::resolution::ResolutionContext;
    use courier_core::shape::Shape;
    use futures::stream::{self, StreamExt};
    use std::fmt;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    struct Shared {
        registry: Arc<Registry>,
        config: MediatorConfig,
        statistics: Arc<StatisticsTracker>,
        subscribers: Arc<SubscriberTracker>,
    }

    struct PreparedNotification {
        middleware: Vec<&'static str>,
        skipped: Vec<&'static str>,
        processors: usize,
        pipeline: NotificationInvoker,
    }

    /// Routes requests to their handler and notifications to every processor.
    ///
    /// Cloning is cheap. Clones and [`scoped`](Self::scoped) mediators share
    /// the registry and both trackers.
    #[derive(Clone)]
    pub struct Mediator {
        shared: Arc<Shared>,
        context: Arc<dyn ResolutionContext>,
    }

    impl Mediator {
        /// Mediator with default configuration.
        #[must_use]
        pub fn new(registry: Registry, context: impl ResolutionContext + 'static) -> Self {
            Self::with_config(registry, context, MediatorConfig::default())
        }

        /// Mediator with explicit configuration.
        #[must_use]
        pub fn with_config(
            registry: Registry,
            context: impl ResolutionContext + 'static,
            config: MediatorConfig,
        ) -> Self {
            Self::with_clock(registry, context, config, Arc::new(SystemClock))
        }

        /// Mediator whose trackers read time from `clock`.
        #[must_use]
        pub fn with_clock(
            registry: Registry,
            context: impl ResolutionContext + 'static,
            config: MediatorConfig,
            clock: Arc<dyn Clock>,
        ) -> Self {
            Self {
                shared: Arc::new(Shared {
                    registry: Arc::new(registry),
                    config,
                    statistics: Arc::new(StatisticsTracker::new(Arc::clone(&clock))),
                    subscribers: Arc::new(SubscriberTracker::new(clock)),
                }),
                context: Arc::new(context),
            }
        }

        /// Mediator resolving from `context`, sharing everything else with `self`.
        #[must_use]
        pub fn scoped(&self, context: impl ResolutionContext + 'static) -> Self {
            Self {
                shared: Arc::clone(&self.shared),
                context: Arc::new(context),
            }
        }

        /// Active configuration.
        #[must_use]
        pub fn config(&self) -> &MediatorConfig {
            &self.shared.config
        }

        /// The registry.
        #[must_use]
        pub fn registry(&self) -> &Registry {
            &self.shared.registry
        }

        /// The resolution context of this scope.
        #[must_use]
        pub fn context(&self) -> &dyn ResolutionContext {
            self.context.as_ref()
        }

        /// Read-only inspector over the registry.
        #[must_use]
        pub fn inspector(&self) -> PipelineInspector {
            PipelineInspector::new(Arc::clone(&self.shared.registry))
        }

        /// The statistics tracker.
        #[must_use]
        pub fn statistics(&self) -> &Arc<StatisticsTracker> {
            &self.shared.statistics
        }

        /// The subscriber tracker.
        #[must_use]
        pub fn subscribers(&self) -> &Arc<SubscriberTracker> {
            &self.shared.subscribers
        }

        /// Send a request to its single handler.
        ///
        /// # Errors
        ///
        /// See [`send_with`](Self::send_with).
        pub async fn send<R: Request>(&self, request: R) -> Result<R::Response, DispatchError> {
            self.send_with(request, DispatchOptions::default()).await
        }

        /// Send a command.
        ///
        /// # Errors
        ///
        /// See [`send_with`](Self::send_with).
        pub async fn send_command<C: Command>(&self, command: C) -> Result<(), DispatchError> {
            self.send_with(command, DispatchOptions::default()).await
        }

        /// Send a request with a session and cancellation signal.
        ///
        /// # Errors
        ///
        /// - [`DispatchError::HandlerNotFound`] / [`DispatchError::AmbiguousHandler`]
        ///   when the shape does not resolve to exactly one handler
        /// - [`DispatchError::Resolution`] when a handler or middleware cannot be built
        /// - [`DispatchError::Cancelled`] when cancelled before a step starts
        /// - anything the middleware or handler returns, attributed but otherwise unchanged
        #[tracing::instrument(skip_all, name = "courier_send", fields(shape = Shape::of::<R>().name()))]
        pub async fn send_with<R: Request>(
            &self,
            request: R,
            options: DispatchOptions,
        ) -> Result<R::Response, DispatchError> {
            let shape = Shape::of::<R>();
            let started = Instant::now();
            let recorder = StepRecorder::default();

            let (middleware, outcome) = if options.cancellation.is_cancelled() {
                (Vec::new(), Err(DispatchError::Cancelled))
            } else {
                match self.request_pipeline::<R>(shape, &recorder) {
                    Ok((middleware, pipeline)) => {
                        (middleware, pipeline(request, options.cancellation.clone()).await)
                    }
                    Err(error) => (Vec::new(), Err(error)),
                }
            };

            let record = PipelineExecutionRecord {
                shape,
                pipeline: PipelineKind::Request(shape),
                middleware,
                skipped: Vec::new(),
                steps: recorder.take(),
                processors: 1,
                duration: started.elapsed(),
                succeeded: outcome.is_ok(),
            };
            self.finish(&options, &record, RequestKind::of::<R>().as_str());
            if let Err(error) = &outcome {
                tracing::debug!(%error, "Request failed");
            }
            outcome
        }

        fn request_pipeline<R: Request>(
            &self,
            shape: Shape,
            recorder: &StepRecorder,
        ) -> Result<(Vec<&'static str>, RequestInvoker<R>), DispatchError> {
            let Some(entry) = self.shared.registry.request_entry::<R>() else {
                return Err(DispatchError::HandlerNotFound { shape });
            };
            let handler = match entry.handlers.as_slice() {
                [] => return Err(DispatchError::HandlerNotFound { shape }),
                [handler] => handler,
                candidates => {
                    return Err(DispatchError::AmbiguousHandler {
                        shape,
                        candidates: candidates.iter().map(|candidate| candidate.name).collect(),
                    });
                }
            };
            tracing::debug!(handler = handler.name, "Resolved handler");
            let instance = (handler.factory)(self.context())?;

            let mut middleware = entry
                .middleware
                .iter()
                .map(|registration| registration.resolve(self.context()))
                .collect::<Result<Vec<_>, _>>()?;
            order_middleware(&mut middleware);
            let names = middleware.iter().map(|step| step.name).collect();

            let terminal = request_terminal(shape, handler.name, instance);
            Ok((names, compose_request(shape, middleware, terminal, recorder)))
        }

        /// Publish a notification to every handler and subscriber.
        ///
        /// # Errors
        ///
        /// See [`publish_with`](Self::publish_with).
        pub async fn publish<N: Notification>(&self, notification: N) -> Result<(), DispatchError> {
            self.publish_with(notification, DispatchOptions::default()).await
        }

        /// Publish with a session and cancellation signal.
        ///
        /// Having no processors is not an error.
        ///
        /// # Errors
        ///
        /// - [`DispatchError::NotificationFailed`] listing every failed processor
        /// - [`DispatchError::Resolution`] when an applicable middleware cannot be built
        /// - [`DispatchError::Cancelled`] when cancelled before fan-out finished starting processors
        /// - errors returned by notification middleware
        #[tracing::instrument(skip_all, name = "courier_publish", fields(shape = Shape::of::<N>().name()))]
        pub async fn publish_with<N: Notification>(
            &self,
            notification: N,
            options: DispatchOptions,
        ) -> Result<(), DispatchError> {
            let started = Instant::now();
            let envelope = NotificationEnvelope::new(notification);
            let shape = envelope.shape();
            let recorder = StepRecorder::default();

            let (prepared, outcome) = if options.cancellation.is_cancelled() {
                (None, Err(DispatchError::Cancelled))
            } else {
                match self.notification_pipeline(&envelope, &recorder) {
                    Ok(prepared) => {
                        let outcome =
                            (prepared.pipeline)(envelope, options.cancellation.clone()).await;
                        (Some(prepared), outcome)
                    }
                    Err(error) => (None, Err(error)),
                }
            };

            let (middleware, skipped, processors) = prepared.map_or_else(
                || (Vec::new(), Vec::new(), 0),
                |prepared| (prepared.middleware, prepared.skipped, prepared.processors),
            );
            let record = PipelineExecutionRecord {
                shape,
                pipeline: PipelineKind::Notification,
                middleware,
                skipped,
                steps: recorder.take(),
                processors,
                duration: started.elapsed(),
                succeeded: outcome.is_ok(),
            };
            self.finish(&options, &record, "notification");
            if let Err(error) = &outcome {
                tracing::debug!(%error, "Publish failed");
            }
            outcome
        }

        fn notification_pipeline(
            &self,
            envelope: &NotificationEnvelope,
            recorder: &StepRecorder,
        ) -> Result<PreparedNotification, DispatchError> {
            let shape = envelope.shape();
            let registry = &self.shared.registry;

            let mut processors: Vec<NotificationProcessor> = registry
                .notification_handlers(shape)
                .iter()
                .map(|handler| NotificationProcessor::AutomaticHandler {
                    name: handler.name,
                    target: (handler.factory)(self.context()),
                })
                .collect();
            processors.extend(self.shared.subscribers.processors_for(shape));

            let mut middleware = Vec::new();
            let mut skipped = Vec::new();
            for registration in registry.notification_middleware() {
                match evaluate_constraint(&registration.constraint, envelope.capabilities()) {
                    Verdict::Applies => middleware.push(registration.resolve(self.context())?),
                    Verdict::NotSatisfied => {
                        tracing::debug!(
                            middleware = registration.name,
                            constraint = %registration.constraint,
                            "Middleware skipped: constraint not satisfied"
                        );
                        skipped.push(registration.name);
                    }
                    Verdict::EvaluationFailed(error) => {
                        tracing::warn!(
                            middleware = registration.name,
                            constraint = %registration.constraint,
                            %error,
                            "Constraint evaluation failed; middleware skipped"
                        );
                        skipped.push(registration.name);
                    }
                }
            }
            order_middleware(&mut middleware);
            DispatchMetrics::record_middleware_skipped(skipped.len());

            let names = middleware.iter().map(|step| step.name).collect();
            let count = processors.len();
            tracing::debug!(processors = count, skipped = skipped.len(), "Resolved notification pipeline");
            let terminal = fan_out(shape, processors, self.shared.config.fan_out);
            Ok(PreparedNotification {
                middleware: names,
                skipped,
                processors: count,
                pipeline: compose_notification(shape, middleware, terminal, recorder),
            })
        }

        /// Open a stream request.
        ///
        /// Routing failures surface as the stream's single item.
        #[must_use]
        pub fn create_stream<R: StreamRequest>(&self, request: R) -> ItemStream<R::Item> {
            self.create_stream_with(request, DispatchOptions::default())
        }

        /// Open a stream request with a session and cancellation signal.
        ///
        /// Once `options.cancellation` fires the stream yields one
        /// [`DispatchError::Cancelled`] and ends.
        #[must_use]
        #[tracing::instrument(skip_all, name = "courier_create_stream", fields(shape = Shape::of::<R>().name()))]
        pub fn create_stream_with<R: StreamRequest>(
            &self,
            request: R,
            options: DispatchOptions,
        ) -> ItemStream<R::Item> {
            let shape = Shape::of::<R>();
            let started = Instant::now();
            let recorder = StepRecorder::default();

            let (middleware, items) = match self.stream_pipeline::<R>(shape, &recorder) {
                Ok((middleware, pipeline)) => {
                    let cancel = options.cancellation.clone();
                    (middleware, Ok(until_cancelled(pipeline(request, cancel.clone()), cancel)))
                }
                Err(error) => (Vec::new(), Err(error)),
            };

            let record = PipelineExecutionRecord {
                shape,
                pipeline: PipelineKind::Stream(shape),
                middleware,
                skipped: Vec::new(),
                steps: recorder.take(),
                processors: 1,
                duration: started.elapsed(),
                succeeded: items.is_ok(),
            };
            self.finish(&options, &record, "stream");

            match items {
                Ok(items) => items,
                Err(error) => {
                    tracing::debug!(%error, "Stream request failed");
                    stream::once(async move { Err(error) }).boxed()
                }
            }
        }

        fn stream_pipeline<R: StreamRequest>(
            &self,
            shape: Shape,
            recorder: &StepRecorder,
        ) -> Result<(Vec<&'static str>, StreamInvoker<R>), DispatchError> {
            let Some(entry) = self.shared.registry.stream_entry::<R>() else {
                return Err(DispatchError::HandlerNotFound { shape });
            };
            let handler = match entry.handlers.as_slice() {
                [] => return Err(DispatchError::HandlerNotFound { shape }),
                [handler] => handler,
                candidates => {
                    return Err(DispatchError::AmbiguousHandler {
                        shape,
                        candidates: candidates.iter().map(|candidate| candidate.name).collect(),
                    });
                }
            };
            let instance = (handler.factory)(self.context())?;

            let mut middleware = entry
                .middleware
                .iter()
                .map(|registration| registration.resolve(self.context()))
                .collect::<Result<Vec<_>, _>>()?;
            order_middleware(&mut middleware);
            let names = middleware.iter().map(|step| step.name).collect();

            let terminal = stream_terminal(shape, handler.name, instance);
            Ok((names, compose_stream(shape, middleware, terminal, recorder)))
        }

        fn finish(&self, options: &DispatchOptions, record: &PipelineExecutionRecord, kind: &'static str) {
            match record.pipeline {
                PipelineKind::Notification => {
                    DispatchMetrics::record_notification(record.shape.name(), record.duration, record.succeeded);
                }
                PipelineKind::Request(_) | PipelineKind::Stream(_) => {
                    DispatchMetrics::record_request(record.shape.name(), kind, record.duration, record.succeeded);
                }
            }
            if self.shared.config.statistics_enabled {
                self.shared
                    .statistics
                    .record_execution(options.session.as_ref(), record);
            }
            tracing::trace!(
                middleware = record.middleware.len(),
                executed = record.executed_middleware(),
                skipped = record.skipped_middleware(),
                duration_us = u64::try_from(record.duration.as_micros()).unwrap_or(u64::MAX),
                succeeded = record.succeeded,
                "Dispatch finished"
            );
        }

        /// Subscribe `subscriber` to shape `N`. The subscriber is held weakly.
        pub fn subscribe<N, S>(&self, subscriber: &Arc<S>) -> Subscription
        where
            N: Notification,
            S: NotificationSubscriber<N>,
        {
            self.shared.subscribers.track::<N, S>(subscriber)
        }

        /// Subscribe `subscriber` to every notification. The subscriber is held weakly.
        pub fn subscribe_all<S: GenericSubscriber>(&self, subscriber: &Arc<S>) -> Subscription {
            self.shared.subscribers.track_generic(subscriber)
        }

        /// End `subscriber`'s subscription to `N`. Returns whether one existed.
        pub fn unsubscribe<N, S>(&self, subscriber: &Arc<S>) -> bool
        where
            N: Notification,
            S: NotificationSubscriber<N>,
        {
            self.shared.subscribers.untrack::<N, S>(subscriber)
        }

        /// End `subscriber`'s generic subscription. Returns whether one existed.
        pub fn unsubscribe_all<S: GenericSubscriber>(&self, subscriber: &Arc<S>) -> bool {
            self.shared.subscribers.untrack_generic(subscriber)
        }

        /// Periodically evict idle sessions and prune dead subscribers until
        /// `shutdown` fires.
        pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> JoinHandle<()> {
            let shared = Arc::clone(&self.shared);
            let period = shared.config.maintenance_interval.max(Duration::from_millis(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let evicted = shared
                                .statistics
                                .evict_idle_sessions(shared.config.session_idle_timeout);
                            let pruned = shared.subscribers.cleanup();
                            if evicted > 0 || pruned > 0 {
                                tracing::info!(evicted, pruned, "Maintenance pass completed");
                            }
                        }
                    }
                }
                tracing::debug!("Maintenance stopped");
            })
        }
    }

    impl fmt::Debug for Mediator {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Mediator")
                .field("registry", &self.shared.registry)
                .field("config", &self.shared.config)
                .finish_non_exhaustive()
        }
    }
}

pub use inspector::PipelineInspector;
pub use mediator::Mediator;
pub use notification::FanOutStrategy;
pub use pipeline::{PipelineExecutionRecord, PipelineKind, StepTiming};
pub use registry::{
    AdmitAll, Candidate, ComponentKind, Configuration, DiscoveryPolicy, MiddlewareOptions,
    Registry, RegistrationModule, RegistryBuilder,
};
pub use statistics::{SessionId, StatisticsSnapshot, StatisticsTracker};
pub use subscribers::{SubscriberTracker, Subscription, SubscriptionId};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use courier_core::error::{BoxError, DispatchError};
    use courier_core::handler::RequestHandler;
    use courier_core::request::Request;
    use courier_core::resolution::ServiceMap;
    use futures::future::{BoxFuture, FutureExt};
    use tokio_util::sync::CancellationToken;

    struct Double(u32);
    impl Request for Double {
        type Response = u32;
    }

    struct DoubleHandler;
    impl RequestHandler<Double> for DoubleHandler {
        fn handle(&self, request: Double, _cancel: CancellationToken) -> BoxFuture<'_, Result<u32, BoxError>> {
            async move { Ok(request.0 * 2) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_send_reaches_single_handler() {
        let registry = Registry::builder().handler::<Double, _>(DoubleHandler).build();
        let mediator = Mediator::new(registry, ServiceMap::new());

        assert_eq!(mediator.send(Double(21)).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_scoped_mediator_shares_statistics() {
        let registry = Registry::builder().handler::<Double, _>(DoubleHandler).build();
        let mediator = Mediator::new(registry, ServiceMap::new());
        let scoped = mediator.scoped(ServiceMap::new());

        scoped
            .send_with(Double(1), DispatchOptions::new().with_session("alice"))
            .await
            .unwrap();

        assert_eq!(mediator.statistics().snapshot_global().request_count("Double"), 1);
        assert!(mediator.statistics().snapshot_session(&SessionId::from("alice")).is_some());
    }

    #[tokio::test]
    async fn test_statistics_can_be_disabled() {
        let registry = Registry::builder().handler::<Double, _>(DoubleHandler).build();
        let config = MediatorConfig::default().with_statistics(false);
        let mediator = Mediator::with_config(registry, ServiceMap::new(), config);

        mediator.send(Double(1)).await.unwrap();

        assert_eq!(mediator.statistics().snapshot_global().total_requests(), 0);
    }

    #[tokio::test]
    async fn test_pre_cancelled_send_never_reaches_handler() {
        let registry = Registry::builder().handler::<Double, _>(DoubleHandler).build();
        let mediator = Mediator::new(registry, ServiceMap::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = mediator
            .send_with(Double(1), DispatchOptions::new().with_cancellation(cancel))
            .await
            .unwrap_err();

        assert!(matches!(error, DispatchError::Cancelled));
    }

    #[tokio::test]
    async fn test_maintenance_stops_on_shutdown() {
        let mediator = Mediator::new(Registry::builder().build(), ServiceMap::new());
        let shutdown = CancellationToken::new();
        let handle = mediator.spawn_maintenance(shutdown.clone());

        shutdown.cancel();

        assert!(handle.await.is_ok());
    }
}
